//! School dashboards: one poller per open dashboard, addressable by id.

mod monitor;
mod poller;

pub use monitor::*;
pub use poller::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{PickupRequest, PickupStatus};

/// What a dashboard shows at one moment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub id: String,
    pub school_id: String,
    pub sound_state: SoundState,
    pub audio_unlocked: bool,
    pub pending_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<PickupRequest>,
    pub requests: Vec<PickupRequest>,
    pub cue_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

/// Registry of open dashboards. A dashboard no client reads for the idle
/// timeout is closed on its own.
pub struct DashboardHub {
    repo: Arc<Repository>,
    settings: PollerSettings,
    dashboards: Mutex<HashMap<String, DashboardPoller>>,
}

impl DashboardHub {
    pub fn new(repo: Arc<Repository>, settings: PollerSettings) -> Self {
        Self {
            repo,
            settings,
            dashboards: Mutex::new(HashMap::new()),
        }
    }

    /// The registry, with dashboards whose poller stopped for idleness removed.
    fn dashboards(&self) -> MutexGuard<'_, HashMap<String, DashboardPoller>> {
        let mut dashboards = self
            .dashboards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        dashboards.retain(|id, poller| {
            if poller.is_stopped() {
                tracing::info!(dashboard_id = %id, "Idle dashboard reclaimed");
                return false;
            }
            true
        });
        dashboards
    }

    /// Open a dashboard for a school and start its poller.
    pub async fn open(&self, school_id: &str) -> Result<DashboardSnapshot, AppError> {
        if self.repo.get_school(school_id).await?.is_none() {
            return Err(AppError::NotFound(format!("School {} not found", school_id)));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let poller = DashboardPoller::spawn(self.repo.clone(), school_id.to_string(), self.settings);
        let snapshot = snapshot_of(&id, &poller);
        let open = {
            let mut dashboards = self.dashboards();
            dashboards.insert(id.clone(), poller);
            dashboards.len()
        };

        tracing::info!(dashboard_id = %id, school_id, open, "Dashboard opened");
        Ok(snapshot)
    }

    /// Current view of a dashboard.
    pub fn snapshot(&self, id: &str) -> Result<DashboardSnapshot, AppError> {
        self.with_poller(id, |poller| snapshot_of(id, poller))
    }

    /// Record the user gesture that allows the sound cue.
    pub fn unlock_audio(&self, id: &str) -> Result<DashboardSnapshot, AppError> {
        self.with_poller(id, |poller| {
            poller.update(|m| m.unlock_audio());
            snapshot_of(id, poller)
        })
    }

    /// Hide the current notification.
    pub fn dismiss(&self, id: &str) -> Result<DashboardSnapshot, AppError> {
        self.with_poller(id, |poller| {
            poller.update(|m| m.dismiss());
            snapshot_of(id, poller)
        })
    }

    /// Mark a request as seen and hide the notification.
    pub async fn acknowledge(&self, id: &str, request_id: &str) -> Result<PickupRequest, AppError> {
        self.request_in_school(id, request_id).await?;
        let updated = self
            .repo
            .set_pickup_status(request_id, PickupStatus::Acknowledged, None)
            .await?;
        self.dismiss(id)?;
        Ok(updated)
    }

    /// Complete a pickup: the request is removed and the notification hidden.
    pub async fn process(&self, id: &str, request_id: &str) -> Result<(), AppError> {
        self.request_in_school(id, request_id).await?;
        self.repo.delete_pickup_request(request_id).await?;
        self.dismiss(id)?;
        Ok(())
    }

    /// Close a dashboard; its timers stop with it.
    pub fn close(&self, id: &str) -> Result<(), AppError> {
        match self.dashboards().remove(id) {
            Some(_) => {
                tracing::info!(dashboard_id = id, "Dashboard closed");
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    fn with_poller<R>(
        &self,
        id: &str,
        f: impl FnOnce(&DashboardPoller) -> R,
    ) -> Result<R, AppError> {
        let dashboards = self.dashboards();
        let poller = dashboards.get(id).ok_or_else(|| not_found(id))?;
        poller.touch();
        Ok(f(poller))
    }

    async fn request_in_school(&self, id: &str, request_id: &str) -> Result<(), AppError> {
        let school_id = self.with_poller(id, |poller| poller.school_id().to_string())?;
        match self.repo.get_pickup_request(request_id).await? {
            Some(request) if request.school_id == school_id => Ok(()),
            _ => Err(AppError::NotFound(format!(
                "Pickup request {} not found",
                request_id
            ))),
        }
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Dashboard {} not found", id))
}

fn snapshot_of(id: &str, poller: &DashboardPoller) -> DashboardSnapshot {
    poller.read(|m| DashboardSnapshot {
        id: id.to_string(),
        school_id: poller.school_id().to_string(),
        sound_state: m.sound_state(),
        audio_unlocked: m.audio_unlocked(),
        pending_count: m.pending_count(),
        notification: m.notification().cloned(),
        requests: m.requests().to_vec(),
        cue_count: m.cue_count(),
        last_update: m.last_update().map(|t| t.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::CreatePickupRequest;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn hub() -> (DashboardHub, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        repo.seed_default_schools().await.unwrap();
        let hub = DashboardHub::new(repo.clone(), PollerSettings::default());
        (hub, repo, temp_dir)
    }

    fn request(school_id: &str) -> CreatePickupRequest {
        CreatePickupRequest {
            id: None,
            child_id: "c1".to_string(),
            child_name: "Mina".to_string(),
            child_class: "Care 1".to_string(),
            parent_id: "p1".to_string(),
            parent_name: "Parent".to_string(),
            parent_phone: "010-0000-0000".to_string(),
            pickup_time: "immediate".to_string(),
            request_time: "14:00".to_string(),
            note: None,
            school_id: school_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_unknown_school() {
        let (hub, _repo, _dir) = hub().await;
        assert!(matches!(hub.open("nope").await, Err(AppError::NotFound(_))));
        assert!(hub.dashboards().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_and_process() {
        let (hub, repo, _dir) = hub().await;
        let opened = hub.open("1").await.unwrap();

        let saved = repo.save_pickup_request(&request("1")).await.unwrap();
        let other = repo.save_pickup_request(&request("2")).await.unwrap();

        let acked = hub.acknowledge(&opened.id, &saved.id).await.unwrap();
        assert_eq!(acked.status, PickupStatus::Acknowledged);
        assert!(hub.snapshot(&opened.id).unwrap().notification.is_none());

        // Requests of another school are not reachable from this dashboard.
        assert!(matches!(
            hub.acknowledge(&opened.id, &other.id).await,
            Err(AppError::NotFound(_))
        ));

        hub.process(&opened.id, &saved.id).await.unwrap();
        assert!(repo.get_pickup_request(&saved.id).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        hub.close(&opened.id).unwrap();
        assert!(matches!(hub.snapshot(&opened.id), Err(AppError::NotFound(_))));
        assert!(matches!(hub.close(&opened.id), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unread_dashboard_is_reclaimed() {
        let (_, repo, _dir) = hub().await;
        let hub = DashboardHub::new(
            repo,
            PollerSettings {
                poll_interval: Duration::from_millis(20),
                idle_timeout: Duration::from_millis(150),
                ..PollerSettings::default()
            },
        );

        let read = hub.open("1").await.unwrap();
        let abandoned = hub.open("1").await.unwrap();

        for _ in 0..15 {
            hub.snapshot(&read.id).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(matches!(
            hub.snapshot(&abandoned.id),
            Err(AppError::NotFound(_))
        ));
        assert!(hub.snapshot(&read.id).is_ok());
        assert_eq!(hub.dashboards().len(), 1);
    }
}
