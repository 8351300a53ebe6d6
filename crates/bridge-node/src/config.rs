use anyhow::{Context, Result};
use common::validation::{sanitize_stream_path, validate_stream_path, MAX_STREAM_PATH_LENGTH};
use common::{BridgeError, Camera};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::retry::{self, RetryPolicy};

/// Where clips come from.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
  /// Vendor cloud API.
  #[default]
  Cloud,
  /// Local sync-module storage tree.
  Local,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
  pub source: SourceKind,
  pub base_url: String,
  /// Overrides the per-account regional host handed back at login.
  pub regional_base_url: Option<String>,
  pub username: Option<String>,
  pub password: Option<String>,
  /// Answers the verification challenge without prompting (headless runs).
  pub verification_code: Option<String>,
  pub credentials_file: PathBuf,
  pub token_lifetime_secs: u64,
  pub refresh_margin_secs: u64,
  /// Wait after a failed login before the next attempt; doubles per failure.
  pub login_cooldown_secs: u64,
  pub login_cooldown_max_secs: u64,
  pub request_timeout_secs: u64,
  pub blink_root: Option<PathBuf>,
}

impl Default for VendorConfig {
  fn default() -> Self {
    Self {
      source: SourceKind::Cloud,
      base_url: "https://rest-prod.immedia-semi.com".to_string(),
      regional_base_url: None,
      username: None,
      password: None,
      verification_code: None,
      credentials_file: PathBuf::from("./data/credentials.json"),
      token_lifetime_secs: 24 * 60 * 60,
      refresh_margin_secs: 300,
      login_cooldown_secs: 30,
      login_cooldown_max_secs: 15 * 60,
      request_timeout_secs: 30,
      blink_root: None,
    }
  }
}

impl fmt::Debug for VendorConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VendorConfig")
      .field("source", &self.source)
      .field("base_url", &self.base_url)
      .field("regional_base_url", &self.regional_base_url)
      .field("username", &self.username)
      .field("password", &self.password.as_ref().map(|_| "<redacted>"))
      .field("verification_code", &self.verification_code.as_ref().map(|_| "<redacted>"))
      .field("credentials_file", &self.credentials_file)
      .field("token_lifetime_secs", &self.token_lifetime_secs)
      .field("refresh_margin_secs", &self.refresh_margin_secs)
      .field("login_cooldown_secs", &self.login_cooldown_secs)
      .field("login_cooldown_max_secs", &self.login_cooldown_max_secs)
      .field("request_timeout_secs", &self.request_timeout_secs)
      .field("blink_root", &self.blink_root)
      .finish()
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CameraEntry {
  pub name: String,
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default)]
  pub stream_path: Option<String>,
  #[serde(default)]
  pub poll_interval_secs: Option<u64>,
}

fn default_true() -> bool {
  true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CamerasConfig {
  /// Applies to vendor cameras with no matching entry.
  pub default_enabled: bool,
  pub poll_interval_secs: u64,
  pub entries: Vec<CameraEntry>,
}

impl Default for CamerasConfig {
  fn default() -> Self {
    Self {
      default_enabled: true,
      poll_interval_secs: 30,
      entries: Vec::new(),
    }
  }
}

/// A discovered camera merged with its configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraPlan {
  pub camera: Camera,
  pub poll_interval: Duration,
}

impl CamerasConfig {
  fn entry_for(&self, camera: &Camera) -> Option<&CameraEntry> {
    self
      .entries
      .iter()
      .find(|e| e.name.eq_ignore_ascii_case(&camera.name) || e.name == camera.id)
  }

  /// Apply enabled flags, stream paths and poll intervals to the cameras the
  /// source reported. Stream paths must come out unique. Only explicitly
  /// configured paths can fail here; a name that sanitizes to nothing usable
  /// or collides falls back to one derived from the camera id.
  pub fn resolve(&self, discovered: Vec<Camera>) -> Result<Vec<CameraPlan>, BridgeError> {
    let mut taken = HashSet::new();
    for camera in &discovered {
      if let Some(path) = self.entry_for(camera).and_then(|e| e.stream_path.as_ref()) {
        validate_stream_path(path).map_err(|e| {
          BridgeError::config(format!("camera '{}': {}", camera.name, e))
        })?;
        if !taken.insert(path.clone()) {
          return Err(BridgeError::config(format!(
            "duplicate stream path '{}' (camera '{}')",
            path, camera.name
          )));
        }
      }
    }

    let mut plans = Vec::with_capacity(discovered.len());
    for mut camera in discovered {
      let entry = self.entry_for(&camera);
      camera.enabled = entry.map(|e| e.enabled).unwrap_or(self.default_enabled);
      camera.stream_path = match entry.and_then(|e| e.stream_path.clone()) {
        Some(path) => path,
        None => {
          let path = derived_stream_path(&camera, &taken);
          taken.insert(path.clone());
          path
        }
      };

      let secs = entry
        .and_then(|e| e.poll_interval_secs)
        .unwrap_or(self.poll_interval_secs);
      plans.push(CameraPlan {
        camera,
        poll_interval: Duration::from_secs(secs),
      });
    }

    Ok(plans)
  }
}

fn derived_stream_path(camera: &Camera, taken: &HashSet<String>) -> String {
  let by_name = sanitize_stream_path(&camera.name);
  if validate_stream_path(&by_name).is_ok() && !taken.contains(&by_name) {
    return by_name;
  }

  let mut base = format!("cam-{}", sanitize_stream_path(&camera.id));
  base.truncate(MAX_STREAM_PATH_LENGTH - 8);
  let base = base.trim_end_matches(['-', '_']).to_string();
  let mut candidate = base.clone();
  let mut n = 2;
  while taken.contains(&candidate) {
    candidate = format!("{base}-{n}");
    n += 1;
  }
  warn!(
    camera = %camera.name,
    id = %camera.id,
    stream_path = %candidate,
    "camera name gives no usable stream path, using one derived from its id"
  );
  candidate
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
  /// Per-camera loop videos and playlists live under here.
  pub videos: PathBuf,
  /// Downloaded clips before they are transcoded.
  pub work: PathBuf,
  /// Last-processed clip ids; omit to keep them in memory only.
  pub markers_file: Option<PathBuf>,
}

impl Default for PathsConfig {
  fn default() -> Self {
    Self {
      videos: PathBuf::from("./data/videos"),
      work: PathBuf::from("./data/work"),
      markers_file: Some(PathBuf::from("./data/markers.json")),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
  pub ffmpeg: PathBuf,
  pub loop_duration_secs: f64,
  pub framerate: u32,
  pub timeout_secs: u64,
}

impl Default for TranscoderConfig {
  fn default() -> Self {
    Self {
      ffmpeg: PathBuf::from("ffmpeg"),
      loop_duration_secs: 0.5,
      framerate: 10,
      timeout_secs: 120,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestartConfig {
  pub max_retries: u32,
  pub backoff_start_ms: u64,
  pub backoff_max_ms: u64,
  /// Uptime after which the consecutive-failure count resets.
  pub stable_after_secs: u64,
}

impl Default for RestartConfig {
  fn default() -> Self {
    Self {
      max_retries: 5,
      backoff_start_ms: 500,
      backoff_max_ms: 10_000,
      stable_after_secs: 60,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
  pub mediamtx: PathBuf,
  pub config_file: PathBuf,
  pub rtsp_host: String,
  pub rtsp_port: u16,
  pub health_check_interval_secs: u64,
  pub restart: RestartConfig,
}

impl Default for PublisherConfig {
  fn default() -> Self {
    Self {
      mediamtx: PathBuf::from("mediamtx"),
      config_file: PathBuf::from("./data/mediamtx.yml"),
      rtsp_host: "localhost".to_string(),
      rtsp_port: 8554,
      health_check_interval_secs: 5,
      restart: RestartConfig::default(),
    }
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct StatusConfig {
  /// Status API listen address; disabled when unset.
  pub bind_addr: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  pub vendor: VendorConfig,
  pub cameras: CamerasConfig,
  pub paths: PathsConfig,
  pub transcoder: TranscoderConfig,
  pub publisher: PublisherConfig,
  pub retry: RetryPolicy,
  pub status: StatusConfig,
}

impl Config {
  /// Read the YAML file, apply environment overrides and validate.
  pub fn load(path: &Path) -> Result<Self> {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config file {}", path.display()))?;
    let mut config = Self::from_yaml(&raw)
      .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
  }

  pub fn from_yaml(raw: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(raw)?)
  }

  /// Secrets may come from the environment instead of the file.
  pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("BLINK_USERNAME") {
      self.vendor.username = Some(v);
    }
    if let Some(v) = lookup("BLINK_PASSWORD") {
      self.vendor.password = Some(v);
    }
    if let Some(v) = lookup("BLINK_VERIFICATION_CODE") {
      self.vendor.verification_code = Some(v);
    }
    if let Some(v) = lookup("BLINK_ROOT") {
      self.vendor.blink_root = Some(PathBuf::from(v));
    }
  }

  pub fn validate(&self) -> Result<(), BridgeError> {
    match self.vendor.source {
      SourceKind::Cloud => {
        if self.vendor.username.as_deref().unwrap_or("").is_empty()
          || self.vendor.password.as_deref().unwrap_or("").is_empty()
        {
          return Err(BridgeError::config(
            "vendor.username and vendor.password (or BLINK_USERNAME/BLINK_PASSWORD) are required",
          ));
        }
      }
      SourceKind::Local => {
        if self.vendor.blink_root.is_none() {
          return Err(BridgeError::config("vendor.blink_root is required for the local source"));
        }
        if self.cameras.entries.is_empty() {
          return Err(BridgeError::config("the local source needs at least one cameras.entries item"));
        }
      }
    }

    if self.vendor.login_cooldown_secs > self.vendor.login_cooldown_max_secs {
      return Err(BridgeError::config(
        "vendor.login_cooldown_secs must not exceed login_cooldown_max_secs",
      ));
    }

    if self.cameras.poll_interval_secs == 0
      || self.cameras.entries.iter().any(|e| e.poll_interval_secs == Some(0))
    {
      return Err(BridgeError::config("poll intervals must be at least one second"));
    }
    for entry in &self.cameras.entries {
      if let Some(path) = &entry.stream_path {
        validate_stream_path(path)
          .map_err(|e| BridgeError::config(format!("camera '{}': {}", entry.name, e)))?;
      }
    }

    if !(self.transcoder.loop_duration_secs > 0.0 && self.transcoder.loop_duration_secs <= 60.0) {
      return Err(BridgeError::config("transcoder.loop_duration_secs must be in (0, 60]"));
    }
    if self.transcoder.framerate == 0 {
      return Err(BridgeError::config("transcoder.framerate must be positive"));
    }
    if self.publisher.health_check_interval_secs == 0 {
      return Err(BridgeError::config("publisher.health_check_interval_secs must be positive"));
    }
    if self.publisher.restart.backoff_start_ms > self.publisher.restart.backoff_max_ms {
      return Err(BridgeError::config(
        "publisher.restart.backoff_start_ms must not exceed backoff_max_ms",
      ));
    }
    retry::validate(&self.retry)?;
    Ok(())
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.vendor.request_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
vendor:
  username: me@example.com
  password: hunter2
cameras:
  default_enabled: false
  poll_interval_secs: 20
  entries:
    - name: Front Door
      stream_path: front-door
      poll_interval_secs: 10
    - name: Garage
      enabled: false
publisher:
  rtsp_host: nvr.local
retry:
  max_attempts: 3
"#;

  #[test]
  fn parses_sample_with_defaults() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    config.validate().unwrap();
    assert_eq!(config.vendor.source, SourceKind::Cloud);
    assert_eq!(config.vendor.base_url, "https://rest-prod.immedia-semi.com");
    assert_eq!(config.cameras.entries.len(), 2);
    assert!(config.cameras.entries[0].enabled);
    assert_eq!(config.publisher.rtsp_host, "nvr.local");
    assert_eq!(config.publisher.rtsp_port, 8554);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.initial_backoff_ms, 500);
    assert_eq!(config.transcoder.loop_duration_secs, 0.5);
  }

  #[test]
  fn resolve_applies_entries_and_defaults() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    let plans = config
      .cameras
      .resolve(vec![
        Camera::new("1", "Front Door"),
        Camera::new("2", "garage"),
        Camera::new("3", "Back Yard"),
      ])
      .unwrap();

    assert_eq!(plans[0].camera.stream_path, "front-door");
    assert!(plans[0].camera.enabled);
    assert_eq!(plans[0].poll_interval, Duration::from_secs(10));

    assert!(!plans[1].camera.enabled);
    assert_eq!(plans[1].camera.stream_path, "garage");

    // no entry, default_enabled = false
    assert!(!plans[2].camera.enabled);
    assert_eq!(plans[2].camera.stream_path, "back_yard");
    assert_eq!(plans[2].poll_interval, Duration::from_secs(20));
  }

  #[test]
  fn resolve_falls_back_to_id_for_colliding_names() {
    let config = CamerasConfig::default();
    let plans = config
      .resolve(vec![Camera::new("1", "Front Door"), Camera::new("2", "front door")])
      .unwrap();
    assert_eq!(plans[0].camera.stream_path, "front_door");
    assert_eq!(plans[1].camera.stream_path, "cam-2");
  }

  #[test]
  fn resolve_tolerates_names_without_usable_characters() {
    let config = CamerasConfig {
      default_enabled: false,
      ..CamerasConfig::default()
    };
    let plans = config
      .resolve(vec![Camera::new("1", "Front Door"), Camera::new("2", "玄関"), Camera::new("3", "***")])
      .unwrap();
    assert_eq!(plans.len(), 3);
    assert_eq!(plans[1].camera.stream_path, "cam-2");
    assert!(!plans[1].camera.enabled);
    assert_eq!(plans[2].camera.stream_path, "cam-3");
  }

  #[test]
  fn resolve_keeps_configured_paths_ahead_of_derived_ones() {
    let config = Config::from_yaml(
      r#"
cameras:
  entries:
    - name: Front Door
      stream_path: porch
"#,
    )
    .unwrap()
    .cameras;
    let plans = config
      .resolve(vec![Camera::new("7", "Porch"), Camera::new("1", "Front Door")])
      .unwrap();
    assert_eq!(plans[0].camera.stream_path, "cam-7");
    assert_eq!(plans[1].camera.stream_path, "porch");
  }

  #[test]
  fn resolve_rejects_duplicate_configured_paths() {
    let config = Config::from_yaml(
      r#"
cameras:
  entries:
    - name: Front Door
      stream_path: door
    - name: Back Door
      stream_path: door
"#,
    )
    .unwrap()
    .cameras;
    let err = config
      .resolve(vec![Camera::new("1", "Front Door"), Camera::new("2", "Back Door")])
      .unwrap_err();
    assert!(err.to_string().contains("duplicate stream path"));
  }

  #[test]
  fn env_overrides_credentials() {
    let mut config = Config::from_yaml("vendor: {}\n").unwrap();
    assert!(config.validate().is_err());

    config.apply_env_overrides(|key| match key {
      "BLINK_USERNAME" => Some("env@example.com".to_string()),
      "BLINK_PASSWORD" => Some("from-env".to_string()),
      _ => None,
    });
    config.validate().unwrap();
    assert_eq!(config.vendor.username.as_deref(), Some("env@example.com"));
  }

  #[test]
  fn debug_redacts_password() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    let printed = format!("{:?}", config);
    assert!(!printed.contains("hunter2"));
    assert!(printed.contains("me@example.com"));
  }

  #[test]
  fn local_source_requires_root_and_entries() {
    let config = Config::from_yaml("vendor:\n  source: local\n").unwrap();
    assert!(config.validate().is_err());

    let config = Config::from_yaml(
      "vendor:\n  source: local\n  blink_root: /mnt/blink\ncameras:\n  entries:\n    - name: Porch\n",
    )
    .unwrap();
    config.validate().unwrap();
  }

  #[test]
  fn rejects_bad_intervals() {
    let mut config = Config::from_yaml(SAMPLE).unwrap();
    config.cameras.poll_interval_secs = 0;
    assert!(config.validate().is_err());

    let mut config = Config::from_yaml(SAMPLE).unwrap();
    config.transcoder.loop_duration_secs = 0.0;
    assert!(config.validate().is_err());
  }
}
