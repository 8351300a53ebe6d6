//! Keeps one media server running and publishing every prepared camera.

pub mod mediamtx;
pub mod process;

pub use mediamtx::MediaMtxLauncher;
pub use process::{ManagedChild, ProcessLauncher, ProcessState};

use common::{BridgeError, BridgeResult, Camera};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RestartConfig;
use crate::metrics::{CAMERAS_PUBLISHING, PUBLISHER_CRASHES_TOTAL, PUBLISHER_FAILED, PUBLISHER_RESTARTS_TOTAL};
use crate::retry::exponential_backoff;
use crate::storage::write_atomic;

#[derive(Debug, Clone, Serialize)]
pub struct PublisherStatus {
    pub state: ProcessState,
    pub consecutive_failures: u32,
    pub gave_up: bool,
    pub streams: Vec<String>,
}

struct Supervised {
    streams: BTreeMap<String, PathBuf>,
    written_config: Option<String>,
    child: Option<Box<dyn ManagedChild>>,
    state: ProcessState,
    started_at: Option<Instant>,
    failures: u32,
    next_restart_at: Option<Instant>,
    gave_up: bool,
}

pub struct StreamPublisher {
    launcher: Arc<dyn ProcessLauncher>,
    config_file: PathBuf,
    ffmpeg: PathBuf,
    rtsp_host: String,
    rtsp_port: u16,
    policy: RestartConfig,
    inner: Mutex<Supervised>,
}

impl StreamPublisher {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        config_file: impl Into<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
        rtsp_host: impl Into<String>,
        rtsp_port: u16,
        policy: RestartConfig,
    ) -> Self {
        Self {
            launcher,
            config_file: config_file.into(),
            ffmpeg: ffmpeg.into(),
            rtsp_host: rtsp_host.into(),
            rtsp_port,
            policy,
            inner: Mutex::new(Supervised {
                streams: BTreeMap::new(),
                written_config: None,
                child: None,
                state: ProcessState::Stopped,
                started_at: None,
                failures: 0,
                next_restart_at: None,
                gave_up: false,
            }),
        }
    }

    pub fn rtsp_url(&self, camera: &Camera) -> String {
        camera.rtsp_url(&self.rtsp_host, self.rtsp_port)
    }

    /// Publish `playlist` under the camera's stream path and make sure the
    /// server is up. Clears an earlier give-up.
    pub async fn ensure_publishing(&self, camera: &Camera, playlist: &Path) -> BridgeResult<String> {
        let mut inner = self.inner.lock().await;

        let changed = inner.streams.get(&camera.stream_path).map(PathBuf::as_path) != Some(playlist);
        if changed {
            inner
                .streams
                .insert(camera.stream_path.clone(), playlist.to_path_buf());
            CAMERAS_PUBLISHING.set(inner.streams.len() as i64);
        }

        let rendered = mediamtx::render_config(&inner.streams, &self.ffmpeg, self.rtsp_port)?;
        if inner.written_config.as_deref() != Some(rendered.as_str()) {
            if let Some(parent) = self.config_file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            write_atomic(&self.config_file, rendered.as_bytes()).await?;
            info!(
                path = %camera.stream_path,
                config = %self.config_file.display(),
                streams = inner.streams.len(),
                "media server config updated"
            );
            inner.written_config = Some(rendered);
        }

        if inner.gave_up {
            info!("retrying media server after earlier give-up");
            inner.gave_up = false;
            inner.failures = 0;
            inner.next_restart_at = None;
            PUBLISHER_FAILED.set(0);
        }

        if inner.child.is_none() {
            self.start(&mut inner).await?;
        }

        Ok(self.rtsp_url(camera))
    }

    async fn start(&self, inner: &mut Supervised) -> BridgeResult<()> {
        inner.state = ProcessState::Starting;
        match self.launcher.launch().await {
            Ok(child) => {
                inner.child = Some(child);
                inner.state = ProcessState::Running;
                inner.started_at = Some(Instant::now());
                inner.next_restart_at = None;
                Ok(())
            }
            Err(e) => {
                inner.state = ProcessState::Crashed;
                self.record_failure(inner, &e.to_string());
                Err(e)
            }
        }
    }

    fn record_failure(&self, inner: &mut Supervised, reason: &str) {
        inner.failures += 1;
        if inner.failures > self.policy.max_retries {
            error!(
                failures = inner.failures,
                reason, "media server keeps failing, giving up until the next publish"
            );
            inner.gave_up = true;
            inner.next_restart_at = None;
            PUBLISHER_FAILED.set(1);
            return;
        }
        let backoff = exponential_backoff(
            self.policy.backoff_start_ms,
            inner.failures,
            self.policy.backoff_max_ms,
        );
        warn!(
            failures = inner.failures,
            backoff_ms = backoff.as_millis() as u64,
            reason,
            "media server down, restart scheduled"
        );
        inner.next_restart_at = Some(Instant::now() + backoff);
    }

    /// One supervision step: notice a crash, restart when the backoff has
    /// elapsed. Returns the state afterwards.
    pub async fn check_health(&self) -> ProcessState {
        let mut inner = self.inner.lock().await;
        let stable_after = Duration::from_secs(self.policy.stable_after_secs);

        let exited = match inner.child.as_mut().map(|c| c.try_exited()) {
            Some(Ok(exited)) => exited,
            Some(Err(e)) => {
                warn!(error = %e, "failed to poll media server");
                None
            }
            None => None,
        };

        if let Some(status) = exited {
            PUBLISHER_CRASHES_TOTAL.inc();
            inner.child = None;
            inner.state = ProcessState::Crashed;
            let uptime = inner.started_at.map(|t| t.elapsed()).unwrap_or_default();
            if uptime >= stable_after {
                inner.failures = 0;
            }
            let reason = BridgeError::ProcessCrash(format!("exited with {status}")).to_string();
            self.record_failure(&mut inner, &reason);
        } else if inner.state == ProcessState::Running
            && inner.failures > 0
            && inner.started_at.is_some_and(|t| t.elapsed() >= stable_after)
        {
            debug!("media server stable again");
            inner.failures = 0;
        }

        let due = inner.next_restart_at.is_some_and(|at| Instant::now() >= at);
        if inner.state == ProcessState::Crashed && !inner.gave_up && due {
            PUBLISHER_RESTARTS_TOTAL.inc();
            info!(attempt = inner.failures, "restarting media server");
            if let Err(e) = self.start(&mut inner).await {
                warn!(error = %e, "media server restart failed");
            }
        }

        inner.state
    }

    /// Poll [`check_health`](Self::check_health) every `interval` until cancelled.
    pub async fn run_health_checks(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.check_health().await;
        }
    }

    pub async fn state(&self) -> ProcessState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> PublisherStatus {
        let inner = self.inner.lock().await;
        PublisherStatus {
            state: inner.state,
            consecutive_failures: inner.failures,
            gave_up: inner.gave_up,
            streams: inner.streams.keys().cloned().collect(),
        }
    }

    /// Stop the media server and wait for it to exit. A pending restart is
    /// cancelled first, and the lock is held until the child is gone.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.next_restart_at = None;
        inner.state = ProcessState::Stopped;
        if let Some(mut child) = inner.child.take() {
            info!("stopping media server");
            if let Err(e) = child.terminate().await {
                warn!(error = %e, "failed to stop media server");
            }
        }
    }
}
