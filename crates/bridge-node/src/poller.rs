use common::validation::validate_id;
use common::{BridgeError, BridgeResult, Camera, Clip, Credential, PollState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{CLIPS_DOWNLOADED_TOTAL, CLIPS_SKIPPED_TOTAL, POLLS_TOTAL};
use crate::status::StatusBoard;
use crate::vendor::ClipSource;

/// What one poll tick found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The camera has no clips at all.
    NoClip,
    /// The newest clip is the one already processed (or deliberately skipped).
    Unchanged,
    /// A newer clip was fetched to `clip.local_path`.
    Downloaded(Clip),
    /// The newest clip expired server-side before it could be fetched.
    Vanished(String),
}

/// Checks one camera for a newer clip and downloads it.
///
/// The poller never touches `Camera::last_clip_id`; the caller advances it
/// once the clip has been turned into a loop video, so a failure anywhere
/// downstream makes the next tick pick the same clip up again.
pub struct ClipPoller {
    source: Arc<dyn ClipSource>,
    work_dir: PathBuf,
    status: Option<Arc<StatusBoard>>,
}

impl ClipPoller {
    pub fn new(source: Arc<dyn ClipSource>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            work_dir: work_dir.into(),
            status: None,
        }
    }

    /// Mirror every state transition onto `status`.
    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn source(&self) -> &Arc<dyn ClipSource> {
        &self.source
    }

    /// Where a clip for `camera` is downloaded to.
    pub fn download_path(&self, camera: &Camera, clip: &Clip) -> BridgeResult<PathBuf> {
        validate_id(&clip.id, "clip_id").map_err(|e| BridgeError::Protocol(e.to_string()))?;
        Ok(self
            .work_dir
            .join(&camera.stream_path)
            .join(format!("{}.mp4", clip.id)))
    }

    /// One `Idle → Checking → (Downloading) → Idle` cycle. `skip` is a clip
    /// id to treat as already handled, e.g. one that vanished server-side.
    #[instrument(skip_all, fields(camera = %camera.name))]
    pub async fn tick(
        &self,
        credential: &Credential,
        camera: &Camera,
        skip: Option<&str>,
        state: &mut PollState,
    ) -> BridgeResult<PollOutcome> {
        let outcome = self.tick_inner(credential, camera, skip, state).await;
        self.enter(camera, state, PollState::Idle).await;
        outcome
    }

    async fn enter(&self, camera: &Camera, state: &mut PollState, next: PollState) {
        *state = next;
        if let Some(status) = &self.status {
            status.set_state(&camera.id, next).await;
        }
    }

    async fn tick_inner(
        &self,
        credential: &Credential,
        camera: &Camera,
        skip: Option<&str>,
        state: &mut PollState,
    ) -> BridgeResult<PollOutcome> {
        if !camera.enabled {
            return Ok(PollOutcome::Unchanged);
        }

        self.enter(camera, state, PollState::Checking).await;
        POLLS_TOTAL.inc();
        let Some(clip) = self.source.latest_clip(credential, camera).await? else {
            debug!("camera has no clips");
            return Ok(PollOutcome::NoClip);
        };

        if !camera.is_new_clip(&clip.id) || skip == Some(clip.id.as_str()) {
            debug!(clip = %clip.id, "no new clip");
            return Ok(PollOutcome::Unchanged);
        }

        self.enter(camera, state, PollState::Downloading).await;
        let dest = self.download_path(camera, &clip)?;
        info!(
            clip = %clip.id,
            previous = camera.last_clip_id.as_deref().unwrap_or("-"),
            "new clip, downloading"
        );
        match self.source.download_clip(credential, &clip, &dest).await {
            Ok(path) => {
                CLIPS_DOWNLOADED_TOTAL.inc();
                Ok(PollOutcome::Downloaded(clip.downloaded_to(path)))
            }
            Err(BridgeError::NotFound(reason)) => {
                warn!(clip = %clip.id, %reason, "clip vanished before download, skipping");
                CLIPS_SKIPPED_TOTAL.inc();
                Ok(PollOutcome::Vanished(clip.id))
            }
            Err(e) => Err(e),
        }
    }
}
