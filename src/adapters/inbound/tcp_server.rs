//! TCP Server Adapter
//!
//! Accepts producer connections and hands each one to a
//! [`ConnectionHandler`] on its own task.

use super::handler::ConnectionHandler;
use crate::infrastructure::shutdown::ShutdownController;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};

/// Pending-connection backlog of each listener.
pub const BACKLOG: u32 = 100;

/// TCP Server - inbound adapter for one producer protocol.
pub struct TcpServer {
    handler: Arc<dyn ConnectionHandler>,
    listen_addr: SocketAddr,
    shutdown: ShutdownController,
}

impl TcpServer {
    pub fn new(
        handler: Arc<dyn ConnectionHandler>,
        listen_addr: SocketAddr,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            handler,
            listen_addr,
            shutdown,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Bind the listen address, shared with sibling worker processes.
    pub fn bind(&self) -> io::Result<TcpListener> {
        bind_shared(self.listen_addr, BACKLOG)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections until shutdown.
    ///
    /// Connections already being served are left to their tasks.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let protocol = self.handler.protocol();
        tracing::info!("{} listener on {}", protocol, listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.shutdown.stopped() => break,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("{} accept failed: {}", protocol, e);
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let guard = self.shutdown.connection_guard();
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = handler.handle(stream, peer).await {
                    tracing::error!("{} connection error from {}: {:?}", protocol, peer, e);
                }
            });
        }

        tracing::info!("{} listener stopped", protocol);
        Ok(())
    }
}

/// Bind with `SO_REUSEADDR` and `SO_REUSEPORT` so every worker process can
/// listen on the same port and the kernel spreads connections between them.
pub fn bind_shared(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
