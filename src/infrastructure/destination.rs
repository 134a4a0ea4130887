//! Destination
//!
//! One persistent outbound connection to one backend.
//!
//! Each destination owns a bounded [`OutboundQueue`] and a single background
//! task that owns the socket. The task runs the connect/reconnect state
//! machine and is the only writer, so at most one frame is ever in flight
//! per backend and frames leave in the order they were queued.

use crate::domain::value_objects::{ConnectionState, DestinationKey};
use crate::infrastructure::codec;
use crate::infrastructure::outbound_queue::OutboundQueue;
use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Seconds to wait after a disconnect before reconnecting.
pub const RECONNECT_INTERVAL_SECS: u64 = 10;

/// Destination configuration.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Maximum number of queued payloads
    pub max_queue_len: usize,
    /// Delay between a disconnect (or failed connect) and the next attempt
    pub reconnect_interval: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            max_queue_len: 100_000,
            reconnect_interval: Duration::from_secs(RECONNECT_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationStats {
    pub state: ConnectionState,
    /// Payloads waiting in the queue
    pub queued: usize,
    /// Payloads evicted because the queue was full
    pub overflows: u64,
    /// Frames fully written to the backend
    pub sent: u64,
    /// Frames whose write failed; never retried
    pub lost: u64,
}

/// Managed connection to one backend.
pub struct Destination {
    key: DestinationKey,
    addr: String,
    config: DestinationConfig,
    queue: Mutex<OutboundQueue>,
    state: AtomicU8,
    /// True while a drain pass is running
    draining: AtomicBool,
    wake: Notify,
    sent: AtomicU64,
    lost: AtomicU64,
}

impl Destination {
    /// Create a disconnected destination with an empty queue.
    ///
    /// Nothing is dialed until [`Destination::start`] is called.
    pub fn new(key: DestinationKey, config: DestinationConfig) -> Self {
        let addr = key.socket_addr();
        let queue = Mutex::new(OutboundQueue::new(config.max_queue_len));
        tracing::debug!("{} destination created", key);
        Self {
            key,
            addr,
            config,
            queue,
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            sent: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.queue.lock().overflows()
    }

    pub fn stats(&self) -> DestinationStats {
        let (queued, overflows) = {
            let queue = self.queue.lock();
            (queue.len(), queue.overflows())
        };
        DestinationStats {
            state: self.state(),
            queued,
            overflows,
            sent: self.sent.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }

    /// Queue a serialized payload and kick the drain loop.
    ///
    /// Never blocks. When the queue is full the oldest payload is dropped;
    /// returns `true` in that case.
    pub fn enqueue(&self, payload: Bytes) -> bool {
        let evicted = self.queue.lock().push(payload);
        if evicted {
            tracing::debug!("{} queue full, dropped oldest payload", self.key);
        }
        self.start_drain();
        evicted
    }

    /// Ask the connection task to drain the queue.
    ///
    /// A no-op while a drain pass is already running; that pass picks up
    /// anything queued before it finishes. Returns whether a wake-up was sent.
    pub fn start_drain(&self) -> bool {
        if self.is_draining() {
            return false;
        }
        self.wake.notify_one();
        true
    }

    /// Spawn the connection task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(this.run())
    }

    /// Connect, drain until the connection breaks, wait, repeat.
    async fn run(self: Arc<Self>) {
        loop {
            tracing::debug!("{} start connection", self.key);
            match self.connect().await {
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("{} connected", self.key);
                    let reason = self.serve(stream).await;
                    self.set_state(ConnectionState::Disconnected);
                    tracing::warn!(
                        "{} disconnected: {} ({} payloads queued)",
                        self.key,
                        reason,
                        self.queue_len()
                    );
                }
                Err(e) => {
                    tracing::error!("{} can't connect to {}: {}", self.key, self.addr, e);
                }
            }
            tokio::time::sleep(self.config.reconnect_interval).await;
        }
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection timeout")),
        }
    }

    /// Drive one connection until it fails; returns the failure.
    ///
    /// Between drains the read half is watched so a backend that closes an
    /// idle connection is noticed without waiting for the next write.
    async fn serve(&self, stream: TcpStream) -> io::Error {
        let (mut reader, mut writer) = stream.into_split();
        let mut scratch = [0u8; 512];

        loop {
            if let Err(e) = self.drain(&mut writer).await {
                return e;
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                read = reader.read(&mut scratch) => match read {
                    Ok(0) => {
                        return io::Error::new(io::ErrorKind::UnexpectedEof, "closed by backend")
                    }
                    Ok(n) => tracing::trace!("{} ignoring {} bytes from backend", self.key, n),
                    Err(e) => return e,
                },
            }
        }
    }

    /// Write queued payloads one frame at a time, oldest first.
    ///
    /// Stops when the queue is empty or the destination is no longer
    /// connected. A payload whose write fails is counted as lost and is not
    /// put back; everything still queued waits for the next connection.
    async fn drain<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            self.draining.store(true, Ordering::SeqCst);

            while self.state() == ConnectionState::Connected {
                let payload = match self.pop() {
                    Some(payload) => payload,
                    None => break,
                };
                if let Err(e) = codec::write_frame(writer, &payload).await {
                    self.lost.fetch_add(1, Ordering::Relaxed);
                    self.draining.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                self.sent.fetch_add(1, Ordering::Relaxed);
            }

            self.draining.store(false, Ordering::SeqCst);

            // An enqueue that saw `draining == true` skipped its wake-up.
            if self.state() != ConnectionState::Connected || self.queue_len() == 0 {
                return Ok(());
            }
        }
    }

    fn pop(&self) -> Option<Bytes> {
        self.queue.lock().pop()
    }

    #[cfg(test)]
    pub(crate) fn queue_pop_for_test(&self) -> Option<Bytes> {
        self.pop()
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("key", &self.key)
            .field("addr", &self.addr)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::codec::{encode_frame, read_frame};
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn test_config(max_queue_len: usize, reconnect_ms: u64) -> DestinationConfig {
        DestinationConfig {
            max_queue_len,
            reconnect_interval: Duration::from_millis(reconnect_ms),
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn destination_for(addr: std::net::SocketAddr, config: DestinationConfig) -> Arc<Destination> {
        let key = DestinationKey::new(addr.ip().to_string(), addr.port(), Some("a".to_string()));
        Arc::new(Destination::new(key, config))
    }

    fn offline_destination(max_queue_len: usize) -> Destination {
        let key: DestinationKey = "127.0.0.1:2004:a".parse().unwrap();
        Destination::new(key, test_config(max_queue_len, 10_000))
    }

    async fn wait_for_state(dest: &Destination, state: ConnectionState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while dest.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {}", state);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn next_payload(stream: &mut TcpStream) -> Bytes {
        tokio::time::timeout(Duration::from_secs(5), read_frame(stream, 1024))
            .await
            .expect("frame timeout")
            .unwrap()
            .expect("unexpected eof")
    }

    #[test]
    fn test_destination_config_default() {
        let config = DestinationConfig::default();
        assert_eq!(config.max_queue_len, 100_000);
        assert_eq!(config.reconnect_interval, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_new_destination_is_disconnected_and_empty() {
        let dest = offline_destination(10);
        assert_eq!(dest.state(), ConnectionState::Disconnected);
        assert_eq!(dest.addr(), "127.0.0.1:2004");
        assert_eq!(dest.key().to_string(), "127.0.0.1:2004:a");
        assert!(!dest.is_draining());
        assert_eq!(
            dest.stats(),
            DestinationStats {
                state: ConnectionState::Disconnected,
                queued: 0,
                overflows: 0,
                sent: 0,
                lost: 0,
            }
        );
    }

    #[test]
    fn test_enqueue_while_disconnected_keeps_last_items() {
        let dest = offline_destination(3);
        let evictions: Vec<bool> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|p| dest.enqueue(Bytes::from(*p)))
            .collect();

        assert_eq!(evictions, vec![false, false, false, true, true]);
        assert_eq!(dest.queue_len(), 3);
        assert_eq!(dest.overflow_count(), 2);

        let remaining: Vec<Bytes> = std::iter::from_fn(|| dest.pop()).collect();
        assert_eq!(remaining, vec![Bytes::from("C"), Bytes::from("D"), Bytes::from("E")]);
    }

    #[tokio::test]
    async fn test_start_drain_is_noop_while_draining() {
        let dest = offline_destination(10);
        assert!(dest.start_drain());

        dest.set_state(ConnectionState::Connected);
        for p in ["first", "second", "third"] {
            dest.enqueue(Bytes::from(p));
        }

        // Room for part of the first frame only, so the pass stalls on it.
        let (mut writer, mut backend) = tokio::io::duplex(4);
        let backend_side = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(dest.is_draining());
            assert!(!dest.start_drain());
            assert_eq!(dest.queue_len(), 2);
            assert_eq!(dest.stats().sent, 0);

            // Queued mid-pass without a wake-up; the same pass delivers it.
            assert!(!dest.enqueue(Bytes::from("fourth")));

            let mut received = Vec::new();
            for _ in 0..4 {
                received.push(read_frame(&mut backend, 1024).await.unwrap().unwrap());
            }
            received
        };
        let (result, received) = tokio::join!(dest.drain(&mut writer), backend_side);

        result.unwrap();
        assert_eq!(received, vec!["first", "second", "third", "fourth"]);
        assert_eq!(dest.stats().sent, 4);
        assert!(!dest.is_draining());
        assert!(dest.start_drain());
    }

    #[tokio::test]
    async fn test_drain_writes_frames_in_fifo_order() {
        let dest = offline_destination(10);
        dest.set_state(ConnectionState::Connected);
        for p in ["one", "two", "three"] {
            dest.enqueue(Bytes::from(p));
        }

        let mut wire: Vec<u8> = Vec::new();
        dest.drain(&mut wire).await.unwrap();

        let mut expected = encode_frame(b"one").to_vec();
        expected.extend_from_slice(&encode_frame(b"two"));
        expected.extend_from_slice(&encode_frame(b"three"));
        assert_eq!(wire, expected);
        assert_eq!(dest.queue_len(), 0);
        assert_eq!(dest.stats().sent, 3);
        assert!(!dest.is_draining());
    }

    #[tokio::test]
    async fn test_drain_does_nothing_while_disconnected() {
        let dest = offline_destination(10);
        dest.enqueue(Bytes::from("kept"));

        let mut wire: Vec<u8> = Vec::new();
        dest.drain(&mut wire).await.unwrap();

        assert!(wire.is_empty());
        assert_eq!(dest.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_loses_in_flight_payload_only() {
        let dest = offline_destination(10);
        dest.set_state(ConnectionState::Connected);
        for p in ["A", "B", "C"] {
            dest.enqueue(Bytes::from(p));
        }

        // "A" goes out, the write of "B" fails.
        let mut broken = tokio_test::io::Builder::new()
            .write(&encode_frame(b"A"))
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "backend gone"))
            .build();
        let err = dest.drain(&mut broken).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let stats = dest.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.queued, 1);
        assert!(!dest.is_draining());

        // Items queued after the break are delivered along with the survivor.
        dest.enqueue(Bytes::from("D"));
        let mut healthy = tokio_test::io::Builder::new()
            .write(&encode_frame(b"C"))
            .write(&encode_frame(b"D"))
            .build();
        dest.drain(&mut healthy).await.unwrap();
        assert_eq!(dest.queue_len(), 0);
        assert_eq!(dest.stats().sent, 3);
    }

    #[tokio::test]
    async fn test_connects_and_delivers_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest = destination_for(listener.local_addr().unwrap(), test_config(100, 100));

        for i in 0..20 {
            dest.enqueue(Bytes::from(format!("payload-{}", i)));
        }
        let handle = dest.start();

        let (mut backend, _) = listener.accept().await.unwrap();
        for i in 0..20 {
            let payload = next_payload(&mut backend).await;
            assert_eq!(payload, Bytes::from(format!("payload-{}", i)));
        }
        wait_for_state(&dest, ConnectionState::Connected).await;

        // Queued after connecting: the wake-up path.
        dest.enqueue(Bytes::from("late"));
        assert_eq!(next_payload(&mut backend).await, Bytes::from("late"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_reconnects_after_interval_and_flushes_backlog() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let interval = Duration::from_millis(300);
        let dest = destination_for(listener.local_addr().unwrap(), test_config(100, 300));
        let handle = dest.start();

        let (mut backend, _) = listener.accept().await.unwrap();
        wait_for_state(&dest, ConnectionState::Connected).await;
        dest.enqueue(Bytes::from("before"));
        assert_eq!(next_payload(&mut backend).await, Bytes::from("before"));

        // Backend goes away.
        drop(backend);
        let dropped_at = Instant::now();
        wait_for_state(&dest, ConnectionState::Disconnected).await;

        // Queued while disconnected: held, not written anywhere.
        dest.enqueue(Bytes::from("after-1"));
        dest.enqueue(Bytes::from("after-2"));
        assert_eq!(dest.queue_len(), 2);

        let (mut backend, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        assert!(
            dropped_at.elapsed() >= interval,
            "reconnected after {:?}, before the {:?} interval",
            dropped_at.elapsed(),
            interval
        );

        assert_eq!(next_payload(&mut backend).await, Bytes::from("after-1"));
        assert_eq!(next_payload(&mut backend).await, Bytes::from("after-2"));
        wait_for_state(&dest, ConnectionState::Connected).await;

        handle.abort();
    }

    #[tokio::test]
    async fn test_connect_failure_retries_until_backend_appears() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let dest = destination_for(addr, test_config(100, 100));
        dest.enqueue(Bytes::from("waiting"));
        let handle = dest.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dest.state(), ConnectionState::Disconnected);
        assert_eq!(dest.queue_len(), 1);

        let listener = TcpListener::bind(addr).await.unwrap();
        let (mut backend, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next_payload(&mut backend).await, Bytes::from("waiting"));

        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_never_interleave_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest = destination_for(listener.local_addr().unwrap(), test_config(10_000, 100));
        let handle = dest.start();
        let (mut backend, _) = listener.accept().await.unwrap();
        wait_for_state(&dest, ConnectionState::Connected).await;

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let dest = Arc::clone(&dest);
                tokio::spawn(async move {
                    for i in 0..250 {
                        dest.enqueue(Bytes::from(format!("{}:{}", p, i)));
                        dest.start_drain();
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        futures::future::join_all(producers).await;

        // Per producer, payloads must arrive whole and in order.
        let mut next_seq = [0usize; 4];
        for _ in 0..1000 {
            let payload = next_payload(&mut backend).await;
            let text = std::str::from_utf8(&payload).unwrap();
            let (p, i) = text.split_once(':').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            assert_eq!(i, next_seq[p], "producer {} out of order", p);
            next_seq[p] += 1;
        }
        assert_eq!(next_seq, [250; 4]);
        assert_eq!(dest.stats().sent, 1000);

        handle.abort();
    }
}
