use async_trait::async_trait;
use common::{BridgeError, BridgeResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Runs one transcoder invocation to completion.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, args: &[String]) -> BridgeResult<()>;
}

pub struct FfmpegTranscoder {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, args: &[String]) -> BridgeResult<()> {
        debug!(binary = %self.binary.display(), args = ?args, "running ffmpeg");
        let result = timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(BridgeError::transcode(format!(
                    "ffmpeg exited with {}: {}",
                    output.status,
                    last_line(&stderr)
                )))
            }
            Ok(Err(e)) => Err(BridgeError::transcode(format!(
                "failed to execute {}: {e}",
                self.binary.display()
            ))),
            Err(_) => Err(BridgeError::transcode(format!(
                "ffmpeg timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Grab the last frame of `clip` as a still image.
pub fn last_frame_args(clip: &Path, frame: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-sseof".into(),
        "-1".into(),
        "-i".into(),
        path_arg(clip),
        "-update".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        path_arg(frame),
    ]
}

/// Encode `frame` as a short still-image clip.
pub fn still_clip_args(frame: &Path, duration_secs: f64, framerate: u32, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-loop".into(),
        "1".into(),
        "-framerate".into(),
        framerate.to_string(),
        "-i".into(),
        path_arg(frame),
        "-t".into(),
        duration_secs.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-tune".into(),
        "stillimage".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        path_arg(output),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_frame_template() {
        let args = last_frame_args(Path::new("/w/c1.mp4"), Path::new("/o/f.jpg"));
        let joined = args.join(" ");
        assert!(joined.contains("-sseof -1 -i /w/c1.mp4"));
        assert_eq!(args.last().map(String::as_str), Some("/o/f.jpg"));
    }

    #[test]
    fn test_still_clip_template() {
        let args = still_clip_args(Path::new("/o/f.jpg"), 0.5, 10, Path::new("/o/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-loop 1 -framerate 10 -i /o/f.jpg -t 0.5"));
        assert!(joined.contains("-c:v libx264"));
        assert_eq!(args.last().map(String::as_str), Some("/o/out.mp4"));
    }

    #[test]
    fn test_last_line_skips_blank() {
        assert_eq!(last_line("a\nboom\n\n"), "boom");
        assert_eq!(last_line(""), "no output");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transcode_error() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg-binary", Duration::from_secs(5));
        let err = transcoder.run(&["-version".to_string()]).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transcode(_)));
    }
}
