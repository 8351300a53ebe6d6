use common::{BridgeError, BridgeResult, Camera, Clip, PollState};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::CamerasConfig;
use crate::credentials::CredentialGate;
use crate::markers::MarkerStore;
use crate::poller::{ClipPoller, PollOutcome};
use crate::preparer::{PreparedLoop, VideoPreparer};
use crate::publisher::StreamPublisher;
use crate::status::StatusBoard;

/// One camera's polling state, owned by its task.
#[derive(Debug, Clone)]
pub struct CameraTask {
    pub camera: Camera,
    pub poll_interval: Duration,
    pub state: PollState,
    /// Newest clip that vanished before it could be fetched.
    skip_clip_id: Option<String>,
}

impl CameraTask {
    pub fn new(camera: Camera, poll_interval: Duration) -> Self {
        Self {
            camera,
            poll_interval,
            state: PollState::Idle,
            skip_clip_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    NoChange,
    Skipped(String),
    Updated {
        clip_id: String,
        /// `None` when the media server could not be (re)started.
        rtsp_url: Option<String>,
    },
}

pub struct Orchestrator {
    gate: Arc<CredentialGate>,
    poller: ClipPoller,
    preparer: VideoPreparer,
    publisher: Arc<StreamPublisher>,
    markers: Arc<MarkerStore>,
    status: Arc<StatusBoard>,
    cameras: CamerasConfig,
    videos_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        gate: Arc<CredentialGate>,
        poller: ClipPoller,
        preparer: VideoPreparer,
        publisher: Arc<StreamPublisher>,
        markers: Arc<MarkerStore>,
        cameras: CamerasConfig,
        videos_dir: impl Into<PathBuf>,
    ) -> Self {
        let status = Arc::new(StatusBoard::new());
        Self {
            gate,
            poller: poller.with_status(status.clone()),
            preparer,
            publisher,
            markers,
            status,
            cameras,
            videos_dir: videos_dir.into(),
        }
    }

    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.poller = self.poller.with_status(status.clone());
        self.status = status;
        self
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    pub fn publisher(&self) -> &Arc<StreamPublisher> {
        &self.publisher
    }

    /// List the account's cameras and merge them with configuration and the
    /// persisted markers. Disabled cameras are returned too, flagged.
    pub async fn discover(&self) -> BridgeResult<Vec<CameraTask>> {
        let source = self.poller.source();
        let lease = self.gate.current().await?;
        let cameras = match source.list_cameras(&lease.credential).await {
            Err(e) if e.is_auth_expired() => {
                warn!("vendor session rejected while listing cameras, renewing");
                let lease = self.gate.renew(lease.generation).await?;
                source.list_cameras(&lease.credential).await?
            }
            other => other?,
        };

        let plans = self.cameras.resolve(cameras)?;
        let mut tasks = Vec::with_capacity(plans.len());
        for plan in plans {
            let mut camera = plan.camera;
            if let Some(clip_id) = self.markers.get(&camera.id).await {
                camera.last_clip_id = Some(clip_id);
            }
            info!(
                camera = %camera.name,
                stream_path = %camera.stream_path,
                enabled = camera.enabled,
                last_clip = camera.last_clip_id.as_deref().unwrap_or("-"),
                "camera discovered"
            );
            self.status.register(&camera).await;
            tasks.push(CameraTask::new(camera, plan.poll_interval));
        }
        Ok(tasks)
    }

    /// Publish loops prepared by an earlier run so streams come up before
    /// the first poll finishes.
    pub async fn resume_published(&self, tasks: &[CameraTask]) {
        for task in tasks.iter().filter(|t| t.camera.enabled) {
            let prepared = PreparedLoop::locate(&self.videos_dir, &task.camera.stream_path);
            if !matches!(tokio::fs::try_exists(&prepared.playlist).await, Ok(true)) {
                continue;
            }
            match self.publisher.ensure_publishing(&task.camera, &prepared.playlist).await {
                Ok(url) => {
                    debug!(camera = %task.camera.name, %url, "resumed existing loop");
                    self.status.record_published(&task.camera.id, &url).await;
                }
                Err(e) => warn!(camera = %task.camera.name, error = %e, "failed to resume existing loop"),
            }
        }
    }

    /// A single poll, prepare and publish pass for one camera.
    pub async fn run_once(&self, task: &mut CameraTask) -> BridgeResult<TickReport> {
        if !task.camera.enabled {
            return Ok(TickReport::NoChange);
        }
        let result = self.tick(task).await;
        self.status
            .record_tick(&task.camera.id, result.as_ref().err().map(|e| e.to_string()))
            .await;
        result
    }

    async fn tick(&self, task: &mut CameraTask) -> BridgeResult<TickReport> {
        let lease = self.gate.current().await?;
        let skip = task.skip_clip_id.clone();
        let outcome = match self
            .poller
            .tick(&lease.credential, &task.camera, skip.as_deref(), &mut task.state)
            .await
        {
            Err(e) if e.is_auth_expired() => {
                warn!(camera = %task.camera.name, "vendor session rejected, renewing");
                let lease = self.gate.renew(lease.generation).await?;
                self.poller
                    .tick(&lease.credential, &task.camera, skip.as_deref(), &mut task.state)
                    .await?
            }
            other => other?,
        };

        match outcome {
            PollOutcome::NoClip | PollOutcome::Unchanged => Ok(TickReport::NoChange),
            PollOutcome::Vanished(clip_id) => {
                task.skip_clip_id = Some(clip_id.clone());
                Ok(TickReport::Skipped(clip_id))
            }
            PollOutcome::Downloaded(clip) => self.apply_clip(task, clip).await,
        }
    }

    async fn apply_clip(&self, task: &mut CameraTask, clip: Clip) -> BridgeResult<TickReport> {
        let Some(downloaded) = clip.local_path.clone() else {
            return Err(BridgeError::Protocol(format!("clip {} was not downloaded", clip.id)));
        };

        let prepared = self
            .preparer
            .prepare_loop(&task.camera, &downloaded, &self.videos_dir)
            .await;
        if let Err(e) = tokio::fs::remove_file(&downloaded).await {
            debug!(path = %downloaded.display(), error = %e, "could not remove downloaded clip");
        }
        let prepared = prepared?;

        task.camera.last_clip_id = Some(clip.id.clone());
        task.skip_clip_id = None;
        if let Err(e) = self.markers.set(&task.camera.id, &clip.id).await {
            warn!(camera = %task.camera.name, error = %e, "failed to persist clip marker");
        }
        self.status.record_clip(&task.camera.id, &clip.id).await;

        let rtsp_url = match self
            .publisher
            .ensure_publishing(&task.camera, &prepared.playlist)
            .await
        {
            Ok(url) => {
                self.status.record_published(&task.camera.id, &url).await;
                Some(url)
            }
            Err(e) => {
                warn!(camera = %task.camera.name, error = %e, "loop prepared but not published");
                None
            }
        };

        info!(camera = %task.camera.name, clip = %clip.id, "camera now shows the latest clip");
        Ok(TickReport::Updated {
            clip_id: clip.id,
            rtsp_url,
        })
    }

    /// Poll one camera every `poll_interval` until cancelled. Errors are
    /// logged and the camera tries again on its next tick. Cancellation drops
    /// a tick in progress, which kills a running transcoder.
    #[instrument(skip_all, fields(camera = %task.camera.name))]
    pub async fn run_camera(&self, mut task: CameraTask, cancel: CancellationToken) {
        info!(interval_secs = task.poll_interval.as_secs(), "camera task started");
        while !cancel.is_cancelled() {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("tick interrupted by shutdown");
                    break;
                }
                result = self.run_once(&mut task) => result,
            };
            match result {
                Ok(TickReport::NoChange) => {}
                Ok(report) => debug!(?report, "tick finished"),
                Err(e @ (BridgeError::AuthExpired | BridgeError::VerificationRequired)) => {
                    error!(error = %e, "vendor login failed")
                }
                Err(e) => warn!(error = %e, "tick failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(task.poll_interval) => {}
            }
        }
        info!("camera task stopped");
    }

    /// Run every enabled camera concurrently until `cancel` fires, then stop
    /// the media server.
    pub async fn run(self: Arc<Self>, tasks: Vec<CameraTask>, cancel: CancellationToken) {
        let mut set = JoinSet::new();
        for task in tasks {
            if !task.camera.enabled {
                info!(camera = %task.camera.name, "camera disabled, not polling");
                continue;
            }
            let this = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move { this.run_camera(task, cancel).await });
        }
        if set.is_empty() {
            warn!("no enabled cameras, idling until shutdown");
            cancel.cancelled().await;
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "camera task aborted");
            }
        }
        self.publisher.shutdown().await;
    }

    /// One concurrent pass over every enabled camera.
    pub async fn run_all_once(&self, tasks: &mut [CameraTask]) -> Vec<BridgeResult<TickReport>> {
        join_all(
            tasks
                .iter_mut()
                .filter(|t| t.camera.enabled)
                .map(|t| self.run_once(t)),
        )
        .await
    }
}
