use chrono::{DateTime, Utc};
use common::{Camera, PollState};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// What the status API reports for one camera.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CameraStatus {
    pub id: String,
    pub name: String,
    pub stream_path: String,
    pub enabled: bool,
    pub state: PollState,
    pub last_clip_id: Option<String>,
    pub rtsp_url: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CameraStatus {
    fn from_camera(camera: &Camera) -> Self {
        Self {
            id: camera.id.clone(),
            name: camera.name.clone(),
            stream_path: camera.stream_path.clone(),
            enabled: camera.enabled,
            state: PollState::Idle,
            last_clip_id: camera.last_clip_id.clone(),
            rtsp_url: None,
            last_polled_at: None,
            last_error: None,
        }
    }
}

#[derive(Default)]
pub struct StatusBoard {
    cameras: RwLock<BTreeMap<String, CameraStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, camera: &Camera) {
        self.cameras
            .write()
            .await
            .insert(camera.id.clone(), CameraStatus::from_camera(camera));
    }

    pub async fn set_state(&self, camera_id: &str, state: PollState) {
        if let Some(s) = self.cameras.write().await.get_mut(camera_id) {
            s.state = state;
        }
    }

    /// A tick finished; `error` is `None` when it succeeded.
    pub async fn record_tick(&self, camera_id: &str, error: Option<String>) {
        if let Some(s) = self.cameras.write().await.get_mut(camera_id) {
            s.state = PollState::Idle;
            s.last_polled_at = Some(Utc::now());
            s.last_error = error;
        }
    }

    pub async fn record_clip(&self, camera_id: &str, clip_id: &str) {
        if let Some(s) = self.cameras.write().await.get_mut(camera_id) {
            s.last_clip_id = Some(clip_id.to_string());
        }
    }

    pub async fn record_published(&self, camera_id: &str, url: &str) {
        if let Some(s) = self.cameras.write().await.get_mut(camera_id) {
            s.rtsp_url = Some(url.to_string());
        }
    }

    pub async fn snapshot(&self) -> Vec<CameraStatus> {
        self.cameras.read().await.values().cloned().collect()
    }

    pub async fn get(&self, camera_id: &str) -> Option<CameraStatus> {
        self.cameras.read().await.get(camera_id).cloned()
    }
}
