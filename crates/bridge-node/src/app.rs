//! Builds the running bridge from a validated [`Config`].

use anyhow::{Context, Result};
use common::BridgeError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::{Config, SourceKind};
use crate::credentials::{
    Authenticator, ConsolePrompt, CredentialGate, CredentialStore, NoAuth, NoPrompt,
    PasswordAuthenticator, StaticCode, VerificationPrompt,
};
use crate::markers::MarkerStore;
use crate::orchestrator::Orchestrator;
use crate::poller::ClipPoller;
use crate::preparer::{FfmpegTranscoder, VideoPreparer};
use crate::publisher::{MediaMtxLauncher, StreamPublisher};
use crate::status::StatusBoard;
use crate::vendor::{BlinkClient, ClipSource, LocalClipSource};

pub struct App {
    pub gate: Arc<CredentialGate>,
    pub orchestrator: Arc<Orchestrator>,
    pub publisher: Arc<StreamPublisher>,
    pub status: Arc<StatusBoard>,
}

/// Create `dir` and return its absolute form. The media server spawns the
/// publishing ffmpeg from its own working directory, so relative playlist
/// paths are not safe to hand over.
async fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    tokio::fs::canonicalize(dir)
        .await
        .with_context(|| format!("failed to resolve {}", dir.display()))
}

fn prompt(config: &Config, interactive: bool) -> Arc<dyn VerificationPrompt> {
    match &config.vendor.verification_code {
        Some(code) => Arc::new(StaticCode(code.clone())),
        None if interactive => Arc::new(ConsolePrompt),
        None => Arc::new(NoPrompt),
    }
}

/// Wrap a startup failure for the exit message. Fatal errors need the
/// operator to change something before a restart can help.
pub fn startup_error(e: BridgeError, what: &str) -> anyhow::Error {
    if e.is_fatal() {
        error!(error = %e, "{what}; fix the configuration or remove the cached session before restarting");
        anyhow::Error::new(e).context(format!("{what} (not retryable)"))
    } else {
        error!(error = %e, "{what}");
        anyhow::Error::new(e).context(what.to_string())
    }
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires instead of triggering an immediate shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = recv_or_pending(tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
    ));

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[cfg(unix)]
async fn recv_or_pending(installed: std::io::Result<tokio::signal::unix::Signal>) {
    match installed {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

pub async fn build(config: &Config, interactive: bool) -> Result<App> {
    let videos = absolute_dir(&config.paths.videos).await?;
    let work = absolute_dir(&config.paths.work).await?;
    let publisher_config = absolute_dir(
        config
            .publisher
            .config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(".")),
    )
    .await?
    .join(
        config
            .publisher
            .config_file
            .file_name()
            .context("publisher.config_file has no file name")?,
    );

    let (source, authenticator, store): (Arc<dyn ClipSource>, Arc<dyn Authenticator>, _) =
        match config.vendor.source {
            SourceKind::Cloud => {
                let mut client = BlinkClient::new(&config.vendor.base_url, config.request_timeout())?
                    .with_token_lifetime(Duration::from_secs(config.vendor.token_lifetime_secs))
                    .with_retry(config.retry.clone());
                if let Some(url) = &config.vendor.regional_base_url {
                    client = client.with_regional_base_url(url);
                }
                let client = Arc::new(client);
                let authenticator = PasswordAuthenticator::new(
                    client.clone(),
                    config.vendor.username.clone().unwrap_or_default(),
                    config.vendor.password.clone().unwrap_or_default(),
                    prompt(config, interactive),
                );
                (
                    client as Arc<dyn ClipSource>,
                    Arc::new(authenticator) as Arc<dyn Authenticator>,
                    Some(CredentialStore::new(&config.vendor.credentials_file)),
                )
            }
            SourceKind::Local => {
                let root = config
                    .vendor
                    .blink_root
                    .clone()
                    .context("vendor.blink_root is required for the local source")?;
                let names = config.cameras.entries.iter().map(|e| e.name.clone()).collect();
                info!(root = %root.display(), "reading clips from local storage");
                (
                    Arc::new(LocalClipSource::new(root, names)) as Arc<dyn ClipSource>,
                    Arc::new(NoAuth) as Arc<dyn Authenticator>,
                    None,
                )
            }
        };

    let gate = Arc::new(
        CredentialGate::new(authenticator, store)
            .with_refresh_margin(Duration::from_secs(config.vendor.refresh_margin_secs))
            .with_login_cooldown(
                Duration::from_secs(config.vendor.login_cooldown_secs),
                Duration::from_secs(config.vendor.login_cooldown_max_secs),
            ),
    );

    let markers = Arc::new(match &config.paths.markers_file {
        Some(path) => MarkerStore::open(path).await?,
        None => MarkerStore::in_memory(),
    });

    let transcoder = Arc::new(FfmpegTranscoder::new(
        &config.transcoder.ffmpeg,
        Duration::from_secs(config.transcoder.timeout_secs),
    ));
    let preparer = VideoPreparer::new(
        transcoder,
        config.transcoder.loop_duration_secs,
        config.transcoder.framerate,
    );

    let publisher = Arc::new(StreamPublisher::new(
        Arc::new(MediaMtxLauncher::new(&config.publisher.mediamtx, &publisher_config)),
        &publisher_config,
        &config.transcoder.ffmpeg,
        config.publisher.rtsp_host.clone(),
        config.publisher.rtsp_port,
        config.publisher.restart.clone(),
    ));

    let status = Arc::new(StatusBoard::new());
    let orchestrator = Orchestrator::new(
        gate.clone(),
        ClipPoller::new(source, work),
        preparer,
        publisher.clone(),
        markers,
        config.cameras.clone(),
        videos,
    )
    .with_status(status.clone());

    Ok(App {
        gate,
        orchestrator: Arc::new(orchestrator),
        publisher,
        status,
    })
}
