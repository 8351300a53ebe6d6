//! MediaMTX config generation and launching.
//!
//! Every published camera becomes a `paths` entry whose `runOnInit` command
//! feeds the looping playlist back into the server over RTSP. MediaMTX watches
//! its config file, so adding a camera only needs a rewrite.

use async_trait::async_trait;
use common::{BridgeError, BridgeResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use super::process::{ManagedChild, ProcessLauncher, TokioChild};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerConfig {
    log_level: &'static str,
    rtsp: bool,
    rtsp_address: String,
    rtmp: bool,
    hls: bool,
    webrtc: bool,
    srt: bool,
    api: bool,
    paths: BTreeMap<String, PathConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PathConfig {
    run_on_init: String,
    run_on_init_restart: bool,
}

/// Shell-style single quoting for the `runOnInit` command line.
fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn publish_command(ffmpeg: &Path, playlist: &Path) -> String {
    format!(
        "{} -hide_banner -loglevel error -re -f concat -safe 0 -i {} -c copy -f rtsp rtsp://localhost:$RTSP_PORT/$MTX_PATH",
        quote(&ffmpeg.to_string_lossy()),
        quote(&playlist.to_string_lossy()),
    )
}

/// Render the server config for `streams` (stream path to playlist).
/// Output is deterministic for the same inputs.
pub fn render_config(
    streams: &BTreeMap<String, PathBuf>,
    ffmpeg: &Path,
    rtsp_port: u16,
) -> BridgeResult<String> {
    let config = ServerConfig {
        log_level: "warn",
        rtsp: true,
        rtsp_address: format!(":{rtsp_port}"),
        rtmp: false,
        hls: false,
        webrtc: false,
        srt: false,
        api: false,
        paths: streams
            .iter()
            .map(|(path, playlist)| {
                (
                    path.clone(),
                    PathConfig {
                        run_on_init: publish_command(ffmpeg, playlist),
                        run_on_init_restart: true,
                    },
                )
            })
            .collect(),
    };
    serde_yaml::to_string(&config)
        .map_err(|e| BridgeError::config(format!("failed to render media server config: {e}")))
}

pub struct MediaMtxLauncher {
    binary: PathBuf,
    config_file: PathBuf,
}

impl MediaMtxLauncher {
    pub fn new(binary: impl Into<PathBuf>, config_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_file: config_file.into(),
        }
    }
}

#[async_trait]
impl ProcessLauncher for MediaMtxLauncher {
    async fn launch(&self) -> BridgeResult<Box<dyn ManagedChild>> {
        info!(binary = %self.binary.display(), config = %self.config_file.display(), "starting media server");
        let child = Command::new(&self.binary)
            .arg(&self.config_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::ProcessCrash(format!("spawn {} failed: {e}", self.binary.display()))
            })?;
        Ok(Box::new(TokioChild::new(child)))
    }
}
