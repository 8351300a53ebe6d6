//! Turns a downloaded clip into a short looping still of its last frame.

pub mod ffmpeg;
pub mod playlist;

pub use ffmpeg::{FfmpegTranscoder, Transcoder};

use common::{BridgeResult, Camera};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::metrics::{TRANSCODES_TOTAL, TRANSCODE_FAILURES_TOTAL};
use crate::storage::write_atomic;
use playlist::{playlist_file_name, render_playlist, video_file_name};

/// Files a prepared camera streams from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLoop {
    pub video: PathBuf,
    pub playlist: PathBuf,
}

impl PreparedLoop {
    /// Where `prepare_loop` puts the outputs for `stream_path`.
    pub fn locate(output_dir: &Path, stream_path: &str) -> Self {
        let dir = output_dir.join(stream_path);
        Self {
            video: dir.join(video_file_name(stream_path)),
            playlist: dir.join(playlist_file_name(stream_path)),
        }
    }
}

pub struct VideoPreparer {
    transcoder: Arc<dyn Transcoder>,
    loop_duration_secs: f64,
    framerate: u32,
}

impl VideoPreparer {
    pub fn new(transcoder: Arc<dyn Transcoder>, loop_duration_secs: f64, framerate: u32) -> Self {
        Self {
            transcoder,
            loop_duration_secs,
            framerate,
        }
    }

    /// Replace the loop video and playlist for `camera` with the last frame
    /// of `clip_path`. On failure the previous outputs stay as they were.
    #[instrument(skip_all, fields(camera = %camera.name, clip = %clip_path.display()))]
    pub async fn prepare_loop(
        &self,
        camera: &Camera,
        clip_path: &Path,
        output_dir: &Path,
    ) -> BridgeResult<PreparedLoop> {
        let outputs = PreparedLoop::locate(output_dir, &camera.stream_path);
        let dir = output_dir.join(&camera.stream_path);
        fs::create_dir_all(&dir).await?;

        let nonce = Uuid::new_v4().simple().to_string();
        let frame = dir.join(format!(".{}_frame.{nonce}.jpg", camera.stream_path));
        let staged = dir.join(format!(".{}_loop.{nonce}.mp4", camera.stream_path));

        let result = self
            .encode(&camera.stream_path, clip_path, &frame, &staged, &outputs)
            .await;
        let _ = fs::remove_file(&frame).await;
        if result.is_err() {
            let _ = fs::remove_file(&staged).await;
        }

        match result {
            Ok(()) => {
                TRANSCODES_TOTAL.inc();
                info!(video = %outputs.video.display(), "loop video ready");
                Ok(outputs)
            }
            Err(e) => {
                TRANSCODE_FAILURES_TOTAL.inc();
                warn!(error = %e, "loop video not updated");
                Err(e)
            }
        }
    }

    async fn encode(
        &self,
        stream_path: &str,
        clip_path: &Path,
        frame: &Path,
        staged: &Path,
        outputs: &PreparedLoop,
    ) -> BridgeResult<()> {
        self.transcoder
            .run(&ffmpeg::last_frame_args(clip_path, frame))
            .await?;
        self.transcoder
            .run(&ffmpeg::still_clip_args(
                frame,
                self.loop_duration_secs,
                self.framerate,
                staged,
            ))
            .await?;
        fs::rename(staged, &outputs.video).await?;
        write_atomic(&outputs.playlist, render_playlist(stream_path).as_bytes()).await?;
        Ok(())
    }
}
