//! Worker Supervisor
//!
//! Starts N copies of the current executable as worker processes and
//! restarts the ones that die abnormally. Workers find out who they are from
//! [`WORKER_ID_ENV`]; they share the listening ports through `SO_REUSEPORT`.

use crate::infrastructure::shutdown::ShutdownController;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tokio::task::JoinSet;

/// Set on worker processes to their index.
pub const WORKER_ID_ENV: &str = "RELAY_WORKER_ID";

/// Restarts allowed over the supervisor's lifetime.
pub const MAX_RESTARTS: usize = 100;

/// Number of workers to run; 0 means one per CPU.
pub fn worker_count(processes: usize) -> usize {
    if processes > 0 {
        return processes;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Worker index of this process, if it was started by a supervisor.
pub fn worker_id_from_env() -> Option<usize> {
    std::env::var(WORKER_ID_ENV).ok()?.parse().ok()
}

/// A worker that exited cleanly is not replaced; anything else is.
pub fn should_restart(status: &io::Result<ExitStatus>) -> bool {
    match status {
        Ok(status) => !status.success(),
        Err(_) => true,
    }
}

pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    workers: usize,
    max_restarts: usize,
}

impl Supervisor {
    /// Supervise `workers` copies of the running executable, with the same
    /// arguments.
    pub fn new(workers: usize) -> io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: std::env::args_os().skip(1).collect(),
            workers,
            max_restarts: MAX_RESTARTS,
        })
    }

    /// Supervise an arbitrary program.
    pub fn with_program(program: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workers,
            max_restarts: MAX_RESTARTS,
        }
    }

    pub fn max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    fn spawn_worker(&self, id: usize) -> io::Result<Child> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ID_ENV, id.to_string())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!("started worker {} (pid {:?})", id, child.id());
        Ok(child)
    }

    fn watch(running: &mut JoinSet<(usize, io::Result<ExitStatus>)>, id: usize, mut child: Child) {
        running.spawn(async move { (id, child.wait().await) });
    }

    /// Run until every worker has exited cleanly, shutdown is requested, or
    /// the restart budget is spent.
    ///
    /// On shutdown the remaining workers are killed.
    pub async fn run(self, shutdown: ShutdownController) -> anyhow::Result<()> {
        let mut running = JoinSet::new();
        for id in 0..self.workers {
            let child = self.spawn_worker(id)?;
            Self::watch(&mut running, id, child);
        }

        let mut restarts = 0;
        loop {
            let joined = tokio::select! {
                joined = running.join_next() => joined,
                _ = shutdown.stopped() => {
                    tracing::info!("stopping {} workers", running.len());
                    running.shutdown().await;
                    return Ok(());
                }
            };

            let (id, status) = match joined {
                Some(joined) => joined?,
                None => {
                    tracing::info!("all workers exited");
                    return Ok(());
                }
            };

            if !should_restart(&status) {
                tracing::info!("worker {} exited normally", id);
                continue;
            }
            match &status {
                Ok(status) => tracing::warn!("worker {} exited with {}", id, status),
                Err(e) => tracing::warn!("worker {} could not be waited on: {}", id, e),
            }

            restarts += 1;
            if restarts > self.max_restarts {
                running.shutdown().await;
                anyhow::bail!("too many worker restarts ({}), giving up", restarts - 1);
            }
            let child = self.spawn_worker(id)?;
            Self::watch(&mut running, id, child);
        }
    }
}
