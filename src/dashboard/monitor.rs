//! Notification and sound state of one school dashboard.
//!
//! New requests are detected by comparing pending counts between consecutive
//! reads. Two requests arriving between reads look like one new request.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PickupRequest;

/// Whether the dashboard is repeating its sound cue.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SoundState {
    #[default]
    Idle,
    SoundLooping,
}

/// Edges produced by one state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    pub pending: usize,
    pub new_notification: bool,
    pub sound_started: bool,
    pub sound_stopped: bool,
}

#[derive(Debug, Default)]
pub struct DashboardMonitor {
    requests: Vec<PickupRequest>,
    previous_pending: usize,
    sound: SoundState,
    audio_unlocked: bool,
    latest: Option<PickupRequest>,
    notification_visible: bool,
    cue_count: u64,
    last_update: Option<DateTime<Utc>>,
}

impl DashboardMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a fresh read of the school's requests (insertion order).
    pub fn observe(&mut self, requests: Vec<PickupRequest>) -> Observation {
        let pending = requests.iter().filter(|r| r.is_pending()).count();
        let mut observation = Observation {
            pending,
            ..Observation::default()
        };

        if pending > self.previous_pending {
            if let Some(newest) = requests.iter().rev().find(|r| r.is_pending()) {
                self.latest = Some(newest.clone());
                self.notification_visible = true;
                observation.new_notification = true;
            }
        }

        self.previous_pending = pending;
        self.requests = requests;
        self.last_update = Some(Utc::now());

        let (started, stopped) = self.reevaluate_sound();
        observation.sound_started = started;
        observation.sound_stopped = stopped;
        observation
    }

    /// Record the user gesture that allows audio playback.
    pub fn unlock_audio(&mut self) -> Observation {
        self.audio_unlocked = true;
        let (sound_started, sound_stopped) = self.reevaluate_sound();
        Observation {
            pending: self.previous_pending,
            new_notification: false,
            sound_started,
            sound_stopped,
        }
    }

    /// Hide the notification without touching the request.
    pub fn dismiss(&mut self) {
        self.notification_visible = false;
    }

    /// Count one played cue and return the running total.
    pub fn record_cue(&mut self) -> u64 {
        self.cue_count += 1;
        self.cue_count
    }

    fn reevaluate_sound(&mut self) -> (bool, bool) {
        let next = if self.previous_pending > 0 && self.audio_unlocked {
            SoundState::SoundLooping
        } else {
            SoundState::Idle
        };

        let edges = match (self.sound, next) {
            (SoundState::Idle, SoundState::SoundLooping) => (true, false),
            (SoundState::SoundLooping, SoundState::Idle) => (false, true),
            _ => (false, false),
        };
        self.sound = next;
        edges
    }

    pub fn sound_state(&self) -> SoundState {
        self.sound
    }

    pub fn audio_unlocked(&self) -> bool {
        self.audio_unlocked
    }

    pub fn pending_count(&self) -> usize {
        self.previous_pending
    }

    /// The newest request surfaced as a notification, while it is visible.
    pub fn notification(&self) -> Option<&PickupRequest> {
        self.latest.as_ref().filter(|_| self.notification_visible)
    }

    pub fn requests(&self) -> &[PickupRequest] {
        &self.requests
    }

    pub fn cue_count(&self) -> u64 {
        self.cue_count
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
}
