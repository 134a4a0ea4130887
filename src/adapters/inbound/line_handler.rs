//! Plaintext Line Handler
//!
//! Reads `metric value timestamp\n` lines. Each line is routed and queued
//! on its own, so one line becomes one pickled payload per destination.

use super::handler::ConnectionHandler;
use crate::application::{RelayError, RelayService};
use crate::infrastructure::codec;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpStream;

pub struct LineHandler {
    service: Arc<RelayService>,
    max_line_len: usize,
}

impl LineHandler {
    pub fn new(service: Arc<RelayService>, max_line_len: usize) -> Self {
        Self {
            service,
            max_line_len,
        }
    }

    /// Relay lines until EOF. Returns the number of lines relayed.
    ///
    /// Lines relayed before an error stay queued.
    pub async fn process<R>(&self, reader: R) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut relayed = 0;

        while codec::read_line(&mut reader, &mut line, self.max_line_len).await? {
            let sample = codec::parse_line(&line)?;
            let batches = self.service.route(std::iter::once(sample));
            self.service.dispatch(batches)?;
            relayed += 1;
        }
        Ok(relayed)
    }
}

#[async_trait]
impl ConnectionHandler for LineHandler {
    fn protocol(&self) -> &'static str {
        "line"
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        tracing::debug!("line connection from {}", peer);
        // Contained here: a bad line closes this connection and nothing else.
        match self.process(stream).await {
            Ok(lines) => tracing::debug!("line connection from {} closed after {} lines", peer, lines),
            Err(e) => tracing::error!("line connection from {} dropped: {}", peer, e),
        }
        Ok(())
    }
}
