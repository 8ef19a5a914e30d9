//! Timer loop behind an open dashboard.
//!
//! One task owns the poll interval, the cue interval and a change-signal
//! receiver. Dropping the [`DashboardPoller`] aborts the task, which clears
//! both timers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::monitor::{DashboardMonitor, SoundState};
use crate::config::Config;
use crate::db::Repository;
use crate::models::Collection;

/// Timer settings for a dashboard poller.
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub sound_repeat: Duration,
    /// The loop stops once no client has touched the dashboard for this long.
    pub idle_timeout: Duration,
}

impl From<&Config> for PollerSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            sound_repeat: config.sound_repeat,
            idle_timeout: config.dashboard_idle,
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            sound_repeat: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Handle to a running dashboard loop.
pub struct DashboardPoller {
    school_id: String,
    state: Arc<Mutex<DashboardMonitor>>,
    nudge: Arc<Notify>,
    last_access: Arc<Mutex<Instant>>,
    task: JoinHandle<()>,
}

impl DashboardPoller {
    /// Start polling `school_id`. The first read happens immediately.
    pub fn spawn(repo: Arc<Repository>, school_id: String, settings: PollerSettings) -> Self {
        let state = Arc::new(Mutex::new(DashboardMonitor::new()));
        let nudge = Arc::new(Notify::new());
        let last_access = Arc::new(Mutex::new(Instant::now()));

        let task = tokio::spawn(run(
            repo,
            school_id.clone(),
            settings,
            state.clone(),
            nudge.clone(),
            last_access.clone(),
        ));

        Self {
            school_id,
            state,
            nudge,
            last_access,
            task,
        }
    }

    /// Record that a client used the dashboard.
    pub fn touch(&self) {
        *lock(&self.last_access) = Instant::now();
    }

    /// Whether the loop has ended, either idle or aborted.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    pub fn school_id(&self) -> &str {
        &self.school_id
    }

    /// Read the monitor.
    pub fn read<R>(&self, f: impl FnOnce(&DashboardMonitor) -> R) -> R {
        f(&lock(&self.state))
    }

    /// Change the monitor and wake the loop so the cue follows the new state.
    pub fn update<R>(&self, f: impl FnOnce(&mut DashboardMonitor) -> R) -> R {
        let result = f(&mut lock(&self.state));
        self.nudge.notify_one();
        result
    }
}

impl Drop for DashboardPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run(
    repo: Arc<Repository>,
    school_id: String,
    settings: PollerSettings,
    state: Arc<Mutex<DashboardMonitor>>,
    nudge: Arc<Notify>,
    last_access: Arc<Mutex<Instant>>,
) {
    let mut poll = time::interval(settings.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cue = time::interval(settings.sound_repeat);
    cue.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut changes = repo.subscribe();
    let mut listening = true;
    let mut cue_running = false;

    tracing::info!(school_id = %school_id, "Dashboard poller started");

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if lock(&last_access).elapsed() >= settings.idle_timeout {
                    tracing::info!(school_id = %school_id, "Dashboard idle, poller stopped");
                    break;
                }
                refresh(&repo, &school_id, &state).await;
            }
            change = changes.recv(), if listening => match change {
                Ok(change) if change.collection == Collection::PickupRequests => {
                    refresh(&repo, &school_id, &state).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Change signals lagged, re-reading");
                    refresh(&repo, &school_id, &state).await;
                }
                Err(RecvError::Closed) => listening = false,
            },
            _ = nudge.notified() => {}
            _ = cue.tick(), if cue_running => {
                let count = lock(&state).record_cue();
                tracing::info!(school_id = %school_id, count, "Pickup sound cue");
            }
        }

        let looping = lock(&state).sound_state() == SoundState::SoundLooping;
        match (looping, cue_running) {
            (true, false) => {
                cue_running = true;
                let count = lock(&state).record_cue();
                tracing::info!(school_id = %school_id, count, "Pickup sound cue");
                cue.reset();
            }
            (false, true) => {
                cue_running = false;
                tracing::debug!(school_id = %school_id, "Pickup sound cue stopped");
            }
            _ => {}
        }
    }
}

/// Re-read the school's requests. A failed read keeps the previous state.
async fn refresh(repo: &Repository, school_id: &str, state: &Mutex<DashboardMonitor>) {
    let requests = match repo.list_pickup_requests_by_school(school_id).await {
        Ok(requests) => requests,
        Err(e) => {
            tracing::error!(school_id, "Failed to load pickup requests: {}", e);
            return;
        }
    };

    let mut monitor = lock(state);
    let observation = monitor.observe(requests);
    if observation.new_notification {
        if let Some(newest) = monitor.notification() {
            tracing::info!(
                school_id,
                request_id = %newest.id,
                child = %newest.child_name,
                pending = observation.pending,
                "New pickup request"
            );
        }
    }
}
