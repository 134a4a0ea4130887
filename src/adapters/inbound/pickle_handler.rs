//! Pickle Handler
//!
//! Reads length-prefixed pickled batches. In broadcast mode the payload is
//! forwarded as received without being decoded.

use super::handler::ConnectionHandler;
use crate::application::{RelayError, RelayService};
use crate::infrastructure::codec;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

pub struct PickleHandler {
    service: Arc<RelayService>,
    max_frame_len: usize,
}

impl PickleHandler {
    pub fn new(service: Arc<RelayService>, max_frame_len: usize) -> Self {
        Self {
            service,
            max_frame_len,
        }
    }

    /// Relay frames until EOF. Returns the number of frames relayed.
    pub async fn process<R>(&self, mut reader: R) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = 0;
        while let Some(payload) = codec::read_frame(&mut reader, self.max_frame_len).await? {
            tracing::trace!("read {} byte pickle frame", payload.len());
            if self.service.is_broadcast() {
                self.service.broadcast(payload);
            } else {
                let samples = codec::decode_samples(&payload)?;
                let batches = self.service.route(samples);
                self.service.dispatch(batches)?;
            }
            frames += 1;
        }
        Ok(frames)
    }
}

#[async_trait]
impl ConnectionHandler for PickleHandler {
    fn protocol(&self) -> &'static str {
        "pickle"
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        tracing::debug!("pickle connection from {}", peer);
        let frames = self.process(stream).await?;
        tracing::debug!("pickle connection from {} closed after {} frames", peer, frames);
        Ok(())
    }
}
