use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the clip bytes live before they are fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "location")]
pub enum ClipSource {
  /// Path relative to the vendor's regional API host.
  Remote(String),
  /// File inside a local sync-module storage tree.
  Local(PathBuf),
}

/// A recorded motion event. Never mutated once downloaded; a newer clip
/// supersedes it instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Clip {
  pub id: String,
  pub camera_id: String,
  pub created_at: DateTime<Utc>,
  pub source: ClipSource,
  #[serde(default)]
  pub local_path: Option<PathBuf>,
}

impl Clip {
  pub fn new(
    id: impl Into<String>,
    camera_id: impl Into<String>,
    created_at: DateTime<Utc>,
    source: ClipSource,
  ) -> Self {
    Self {
      id: id.into(),
      camera_id: camera_id.into(),
      created_at,
      source,
      local_path: None,
    }
  }

  /// Returns the downloaded copy of this clip.
  pub fn downloaded_to(&self, path: impl AsRef<Path>) -> Self {
    Self {
      local_path: Some(path.as_ref().to_path_buf()),
      ..self.clone()
    }
  }
}
