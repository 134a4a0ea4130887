//! Worker
//!
//! One relay process: a router, one [`Destination`] per configured backend,
//! and the line and pickle listeners, all on a single-threaded runtime.

use crate::adapters::inbound::{LineHandler, PickleHandler, TcpServer};
use crate::adapters::outbound::{ConsistentHashRouter, RulesRouter};
use crate::application::relay_service::RelayService;
use crate::config::Config;
use crate::domain::ports::Router;
use crate::domain::value_objects::DestinationKey;
use crate::infrastructure::destination::Destination;
use crate::infrastructure::shutdown::{shutdown_signal, ShutdownController};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Pick the router named by the config.
pub fn build_router(config: &Config, keys: &[DestinationKey]) -> anyhow::Result<Arc<dyn Router>> {
    match &config.rules {
        Some(path) => {
            let router = RulesRouter::from_file(path, keys)?;
            tracing::info!("routing with {} rules from {}", router.rule_count(), path);
            Ok(Arc::new(router))
        }
        None => {
            tracing::info!(
                "routing with consistent hashing, replication factor {}",
                config.replication
            );
            Ok(Arc::new(ConsistentHashRouter::new(keys.to_vec(), config.replication)))
        }
    }
}

pub struct Worker {
    id: usize,
    service: Arc<RelayService>,
    line: TcpServer,
    pickle: TcpServer,
    shutdown: ShutdownController,
}

impl Worker {
    /// Wire up a worker. Nothing is bound or dialed yet.
    pub fn build(config: &Config, id: usize) -> anyhow::Result<Self> {
        let keys = config.destination_keys()?;
        let router = build_router(config, &keys)?;

        let dest_config = config.destination_config();
        let destinations = keys
            .into_iter()
            .map(|key| Arc::new(Destination::new(key, dest_config.clone())))
            .collect();
        let service = Arc::new(RelayService::new(router, destinations));

        let shutdown = ShutdownController::new();
        let line = TcpServer::new(
            Arc::new(LineHandler::new(service.clone(), config.max_line_len)),
            config.line_addr()?,
            shutdown.clone(),
        );
        let pickle = TcpServer::new(
            Arc::new(PickleHandler::new(service.clone(), config.max_frame_len)),
            config.pickle_addr()?,
            shutdown.clone(),
        );

        Ok(Self {
            id,
            service,
            line,
            pickle,
            shutdown,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn service(&self) -> &Arc<RelayService> {
        &self.service
    }

    pub fn shutdown_controller(&self) -> ShutdownController {
        self.shutdown.clone()
    }

    /// Bind the configured ports and serve until shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let line = self.line.bind()?;
        let pickle = self.pickle.bind()?;
        self.serve(line, pickle).await
    }

    /// Serve on already bound listeners until shutdown.
    ///
    /// Destination tasks are stopped on return; queued payloads are dropped.
    /// Producer connections still open are left to end with the process.
    pub async fn serve(self, line: TcpListener, pickle: TcpListener) -> anyhow::Result<()> {
        let tasks = self.service.start();
        tracing::info!(
            "worker {} relaying to {} destinations",
            self.id,
            tasks.len()
        );

        let result = tokio::try_join!(self.line.serve(line), self.pickle.serve(pickle)).map(|_| ());
        self.shutdown.shutdown();

        let open = self.shutdown.active_connections();
        if open > 0 {
            tracing::info!("{} producer connections still open", open);
        }
        for task in &tasks {
            task.abort();
        }
        for (key, stats) in self.service.stats() {
            if stats.queued > 0 {
                tracing::warn!("{} dropping {} queued payloads", key, stats.queued);
            }
            tracing::info!(
                "{} sent={} lost={} overflows={}",
                key,
                stats.sent,
                stats.lost,
                stats.overflows
            );
        }
        result
    }
}

/// Entry point of a worker process.
pub async fn run_worker(config: Config, id: usize) -> anyhow::Result<()> {
    let span = tracing::info_span!("worker", id, instance = %config.instance);
    async move {
        let worker = Worker::build(&config, id)?;
        let shutdown = worker.shutdown_controller();
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal(shutdown).await {
                tracing::error!("can't install signal handlers: {}", e);
            }
        });
        worker.run().await
    }
    .instrument(span)
    .await
}
