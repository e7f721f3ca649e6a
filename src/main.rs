//! Application entrypoint: CLI parsing, telemetry init, lifecycle.

mod config;
mod coordinator;
mod error;
mod geo;
mod ingest;
mod ledger;
mod model;
mod net_util;
mod pipeline_probe;
mod progress;
mod revalidate;
mod sources;
mod stage1;
mod stage2;
mod stage3;
mod uri;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::coordinator::Coordinator;

/// A single positional argument may override the sources file path; no
/// other flags are defined (§6 CLI surface).
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    sources_path: Option<String>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    // The crypto provider is process-global and must be installed exactly
    // once before any `rustls::ClientConfig` is built (Stage 2's TLS probe).
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let cfg = match AppConfig::load(cli.sources_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    if cfg.debug {
        debug!(?cfg, "parameter snapshot");
    }

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, winding down");
            cancel_for_signal.cancel();
        }
    });

    let coordinator = Coordinator::new(cfg);
    let exit_code = coordinator.run(cancel).await;

    std::process::ExitCode::from(exit_code as u8)
}
