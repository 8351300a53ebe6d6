use anyhow::{Context, Result};
use bridge_node::api::{self, ApiState};
use bridge_node::app::{self, shutdown_signal, startup_error};
use bridge_node::{Config, TickReport};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "blinkbridge")]
#[command(version, about = "Serve the latest clip of each Blink camera as an RTSP stream", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "BLINKBRIDGE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Also write daily-rotated JSON logs here
    #[arg(long, env = "BLINKBRIDGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Poll every camera once, publish, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = telemetry::LogConfig::new("blinkbridge")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_default_filter("info,bridge_node=info");
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_file_logging(dir);
    }
    let _log_guard = telemetry::init_structured_logging(log_config)?;

    let config = Config::load(&cli.config)?;
    info!(config = %cli.config.display(), source = ?config.vendor.source, "configuration loaded");

    let app = app::build(&config, std::io::stdin().is_terminal()).await?;

    if let Err(e) = app.gate.initialize().await {
        return Err(startup_error(e, "failed to establish a vendor session"));
    }
    let mut tasks = match app.orchestrator.discover().await {
        Ok(tasks) => tasks,
        Err(e) => return Err(startup_error(e, "failed to list cameras")),
    };

    println!("Streams:");
    for task in tasks.iter().filter(|t| t.camera.enabled) {
        println!("  {:<24} {}", task.camera.name, app.publisher.rtsp_url(&task.camera));
    }

    app.orchestrator.resume_published(&tasks).await;

    if cli.once {
        let results = app.orchestrator.run_all_once(&mut tasks).await;
        let mut failed = 0;
        for result in results {
            match result {
                Ok(TickReport::Updated { clip_id, .. }) => info!(clip = %clip_id, "updated"),
                Ok(_) => {}
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "camera failed");
                }
            }
        }
        app.publisher.shutdown().await;
        anyhow::ensure!(failed == 0, "{failed} camera(s) failed");
        return Ok(());
    }

    let cancel = CancellationToken::new();

    let health = tokio::spawn(app.publisher.clone().run_health_checks(
        Duration::from_secs(config.publisher.health_check_interval_secs),
        cancel.clone(),
    ));

    let api_server = match &config.status.bind_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind status API on {addr}"))?;
            info!(addr = %addr, "status API listening");
            let router = api::router(ApiState {
                status: app.status.clone(),
                publisher: app.publisher.clone(),
            });
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { cancel.cancelled().await })
                    .await
                {
                    error!(error = %e, "status API failed");
                }
            }))
        }
        None => None,
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    app.orchestrator.clone().run(tasks, cancel.clone()).await;
    cancel.cancel();
    let _ = health.await;
    if let Some(server) = api_server {
        let _ = server.await;
    }

    info!("blinkbridge stopped");
    Ok(())
}
