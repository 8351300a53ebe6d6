use serde::{Deserialize, Serialize};

use crate::validation::sanitize_stream_path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Camera {
  pub id: String,
  pub name: String,
  pub enabled: bool,
  /// Advanced only once the loop video for that clip has been prepared.
  pub last_clip_id: Option<String>,
  pub stream_path: String,
}

impl Camera {
  /// Builds a camera whose stream path is derived from its display name.
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      id: id.into(),
      stream_path: sanitize_stream_path(&name),
      name,
      enabled: true,
      last_clip_id: None,
    }
  }

  pub fn with_stream_path(mut self, stream_path: impl Into<String>) -> Self {
    self.stream_path = stream_path.into();
    self
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn with_last_clip(mut self, clip_id: impl Into<String>) -> Self {
    self.last_clip_id = Some(clip_id.into());
    self
  }

  /// True when `clip_id` is something this camera has not processed yet.
  pub fn is_new_clip(&self, clip_id: &str) -> bool {
    self.last_clip_id.as_deref() != Some(clip_id)
  }

  pub fn rtsp_url(&self, host: &str, port: u16) -> String {
    if port == 554 {
      format!("rtsp://{}/{}", host, self.stream_path)
    } else {
      format!("rtsp://{}:{}/{}", host, port, self.stream_path)
    }
  }
}

/// Per-camera poll cycle. A tick always ends back in `Idle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
  #[default]
  Idle,
  Checking,
  Downloading,
}

impl std::fmt::Display for PollState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PollState::Idle => write!(f, "idle"),
      PollState::Checking => write!(f, "checking"),
      PollState::Downloading => write!(f, "downloading"),
    }
  }
}
