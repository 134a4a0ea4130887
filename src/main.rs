//! metric-relay - carbon-style metrics relay
//!
//! Composition root: loads the config, then runs either a single worker or
//! a supervisor that re-executes this binary once per worker.

use metric_relay::application::run_worker;
use metric_relay::config::load_config;
use metric_relay::infrastructure::shutdown::{shutdown_signal, ShutdownController};
use metric_relay::infrastructure::supervisor::{worker_count, worker_id_from_env, Supervisor};
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;
    if let Err(e) = cfg.validate() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    if let Some(id) = worker_id_from_env() {
        return run_worker(cfg, id).await;
    }

    let workers = worker_count(cfg.processes);
    tracing::info!(
        "starting metric-relay instance={} line={} pickle={} destinations={} workers={}",
        cfg.instance,
        cfg.line_port,
        cfg.pickle_port,
        cfg.destinations.len(),
        workers
    );

    if workers == 1 {
        return run_worker(cfg, 0).await;
    }

    let shutdown = ShutdownController::new();
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal(signals).await {
            tracing::error!("can't install signal handlers: {}", e);
        }
    });
    Supervisor::new(workers)?.run(shutdown).await
}
