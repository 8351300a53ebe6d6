use common::BridgeResult;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::storage::write_atomic;

/// Last processed clip id per camera id, persisted as a JSON object so a
/// restart does not re-transcode clips it already handled.
pub struct MarkerStore {
    path: Option<PathBuf>,
    markers: Mutex<BTreeMap<String, String>>,
}

impl MarkerStore {
    /// Markers that live only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            markers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load `path`. A missing file starts empty; an unreadable one is logged
    /// and also starts empty, which only costs one redundant transcode per
    /// camera.
    pub async fn open(path: impl Into<PathBuf>) -> BridgeResult<Self> {
        let path = path.into();
        let markers = match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(markers) => markers,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable marker file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            markers: Mutex::new(markers),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, camera_id: &str) -> Option<String> {
        self.markers.lock().await.get(camera_id).cloned()
    }

    /// Record `clip_id` for `camera_id` and persist the whole map.
    pub async fn set(&self, camera_id: &str, clip_id: &str) -> BridgeResult<()> {
        let mut markers = self.markers.lock().await;
        markers.insert(camera_id.to_string(), clip_id.to_string());
        if let Some(path) = &self.path {
            let raw = serde_json::to_vec_pretty(&*markers)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            write_atomic(path, &raw).await?;
            debug!(camera = camera_id, clip = clip_id, "marker persisted");
        }
        Ok(())
    }
}
