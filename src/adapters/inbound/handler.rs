use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Serves one accepted producer connection until it closes.
///
/// Errors returned here end only this connection; the accept loop logs them.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Short protocol name used in log lines.
    fn protocol(&self) -> &'static str;

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()>;
}
