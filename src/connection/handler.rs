//! Connection Handler Module
//!
//! This module runs client connections. Every connection gets its own task
//! that decodes requests, executes them and writes the replies back, while the
//! [`ConnectionHandler`] keeps a registry of live sessions so a shutdown can
//! drain all of them.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (accepted by the server)
//!        │
//!        ▼
//! 2. closing? ──yes──> socket dropped, done
//!        │ no
//!        ▼
//! 3. Session registered (Active)
//!        │
//!        ▼
//! 4. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │  next frame ──> execute      │
//!    │       ▲            │         │
//!    │       └── write reply        │
//!    └──────────────────────────────┘
//!        │  stream ended / read error / force-closed
//!        ▼
//! 5. Session unregistered and closed
//! ```
//!
//! ## Shutdown
//!
//! [`ConnectionHandler::close`] sets the closing flag once, then drains every
//! registered session concurrently. Each one gets the configured bound to
//! finish its outstanding writes before its socket is closed.

use crate::connection::session::{ConnectionError, Session, SessionId};
use crate::protocol::{FrameError, FrameStream, RespValue};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Executes one decoded request and produces its reply.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: RespValue) -> RespValue;
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Malformed frames received
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Runs connections against a [`RequestHandler`] and tracks their sessions.
///
/// Shared by every connection task, usually behind an `Arc`.
pub struct ConnectionHandler<H> {
    service: H,
    sessions: DashMap<SessionId, Arc<Session>>,
    closing: AtomicBool,
    next_id: AtomicU64,
    drain_timeout: Duration,
    stats: Arc<ConnectionStats>,
}

impl<H: RequestHandler> ConnectionHandler<H> {
    /// Creates a handler whose sessions get `drain_timeout` to finish pending
    /// writes at shutdown.
    pub fn new(service: H, drain_timeout: Duration) -> Self {
        Self {
            service,
            sessions: DashMap::new(),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            drain_timeout,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Connection statistics shared by all sessions.
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Number of registered sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Serves one connection until it ends or is closed by shutdown.
    ///
    /// If the handler is already closing, the connection is dropped at once.
    pub async fn handle<S>(&self, stream: S, peer: impl Into<String>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        if self.is_closing() {
            debug!(client = %peer, "Rejecting connection, handler is closing");
            return;
        }

        let (reader, writer) = tokio::io::split(stream);
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(id, peer, Box::new(writer)));

        self.sessions.insert(id, Arc::clone(&session));
        self.stats.connection_opened();
        info!(client = %session.peer(), session = %id, "Client connected");

        // close() may have taken its snapshot just before the insert above
        if self.is_closing() {
            self.finish(&session).await;
            return;
        }

        let result = self.serve(&session, reader).await;

        match &result {
            Ok(()) => info!(client = %session.peer(), "Client disconnected"),
            Err(ConnectionError::Closed) => {
                debug!(client = %session.peer(), "Session closed by shutdown")
            }
            Err(ConnectionError::Frame(FrameError::Io(io_err)))
            | Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %session.peer(), "Connection reset by client")
            }
            Err(e) => warn!(client = %session.peer(), error = %e, "Connection error"),
        }

        self.finish(&session).await;
    }

    /// The read-execute-respond loop.
    async fn serve<R>(&self, session: &Session, reader: R) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FrameStream::new(reader);
        let mut counted = 0;

        loop {
            let payload = tokio::select! {
                _ = session.closed() => return Err(ConnectionError::Closed),
                payload = frames.next_frame() => payload,
            };

            self.stats.bytes_read(frames.bytes_read() - counted);
            counted = frames.bytes_read();

            let reply = match payload {
                None | Some(Err(FrameError::Closed)) => return Ok(()),
                Some(Ok(request)) => {
                    self.stats.command_processed();
                    self.service.handle(request)
                }
                Some(Err(FrameError::Protocol(err))) => {
                    self.stats.protocol_error();
                    warn!(session = %session.id(), error = %err, "Protocol error");
                    RespValue::error(format!("ERR Protocol error: {}", err))
                }
                Some(Err(err)) => return Err(err.into()),
            };

            let written = session.write_reply(&reply).await?;
            self.stats.bytes_written(written);
        }
    }

    /// Unregisters and closes a session whose read loop has ended.
    async fn finish(&self, session: &Session) {
        self.sessions.remove(&session.id());
        self.stats.connection_closed();
        session.close_now().await;
    }

    /// Stops accepting sessions and drains every registered one.
    ///
    /// Only the first call does any work. It returns once every session it
    /// found has either drained or been force-closed.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let sessions = self.sessions();
        info!(sessions = sessions.len(), "Handler shutting down");

        let mut drains = JoinSet::new();
        for session in sessions {
            let timeout = self.drain_timeout;
            drains.spawn(async move { session.close(timeout).await });
        }

        let mut forced = 0usize;
        while let Some(drained) = drains.join_next().await {
            if !matches!(drained, Ok(true)) {
                forced += 1;
            }
        }
        info!(forced, "All sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::session::SessionState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Replies to every request with the request itself.
    struct Mirror;

    impl RequestHandler for Mirror {
        fn handle(&self, request: RespValue) -> RespValue {
            request
        }
    }

    fn handler(drain: Duration) -> Arc<ConnectionHandler<Mirror>> {
        Arc::new(ConnectionHandler::new(Mirror, drain))
    }

    fn spawn_session(
        handler: &Arc<ConnectionHandler<Mirror>>,
    ) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(4096);
        let handler = Arc::clone(handler);
        let task = tokio::spawn(async move { handler.handle(server, "duplex").await });
        (client, task)
    }

    async fn read_exact_len(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn wait_for_sessions(handler: &ConnectionHandler<Mirror>, n: usize) {
        while handler.active_sessions() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let handler = handler(Duration::from_secs(1));
        let (mut client, task) = spawn_session(&handler);

        client.write_all(b"+OK\r\n:7\r\n$2\r\nhi\r\n").await.unwrap();
        let reply = read_exact_len(&mut client, 17).await;
        assert_eq!(&reply[..], b"+OK\r\n:7\r\n$2\r\nhi\r\n");

        drop(client);
        task.await.unwrap();

        let stats = handler.stats();
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 17);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 17);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(handler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_protocol_error_is_answered_and_connection_survives() {
        let handler = handler(Duration::from_secs(1));
        let (mut client, task) = spawn_session(&handler);

        client.write_all(b":abc\r\n").await.unwrap();
        let expected = b"-ERR Protocol error: illegal number abc\r\n";
        let reply = read_exact_len(&mut client, expected.len()).await;
        assert_eq!(&reply[..], &expected[..]);

        client.write_all(b"+OK\r\n").await.unwrap();
        assert_eq!(&read_exact_len(&mut client, 5).await[..], b"+OK\r\n");

        drop(client);
        task.await.unwrap();
        assert_eq!(handler.stats().protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_close_drains_active_sessions() {
        let handler = handler(Duration::from_secs(5));
        let (mut first, first_task) = spawn_session(&handler);
        let (mut second, second_task) = spawn_session(&handler);
        wait_for_sessions(&handler, 2).await;

        let sessions = handler.sessions();
        handler.close().await;
        assert!(handler.is_closing());
        assert!(sessions.iter().all(|s| s.state() == SessionState::Closed));

        first_task.await.unwrap();
        second_task.await.unwrap();
        assert_eq!(handler.active_sessions(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(first.read(&mut buf).await.unwrap(), 0);
        assert_eq!(second.read(&mut buf).await.unwrap(), 0);
    }

    /// A request whose mirrored reply cannot fit in the 4096-byte pipe.
    fn large_request() -> Vec<u8> {
        RespValue::bulk_string(vec![b'x'; 64 * 1024]).serialize()
    }

    async fn wait_for_pending_write(handler: &ConnectionHandler<Mirror>) {
        while !handler.sessions().iter().any(|s| s.pending_writes() > 0) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_close_forces_out_blocked_write_after_bound() {
        let drain = Duration::from_millis(200);
        let handler = handler(drain);
        let (mut client, task) = spawn_session(&handler);

        // the client never reads, so the reply stalls once the pipe is full
        let request = large_request();
        client.write_all(&request).await.unwrap();
        wait_for_pending_write(&handler).await;

        let started = std::time::Instant::now();
        handler.close().await;
        assert!(started.elapsed() >= drain);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handler.active_sessions(), 0);

        // what made it into the pipe is readable, then the socket is closed
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert!(received.starts_with(b"$65536\r\n"));
        assert!(received.len() < request.len());
    }

    #[tokio::test]
    async fn test_close_waits_for_write_that_finishes() {
        let handler = handler(Duration::from_secs(5));
        let (mut client, task) = spawn_session(&handler);

        let request = large_request();
        client.write_all(&request).await.unwrap();
        wait_for_pending_write(&handler).await;

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            client.read_to_end(&mut received).await.unwrap();
            received
        });

        let started = std::time::Instant::now();
        handler.close().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        task.await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_connection_rejected_while_closing() {
        let handler = handler(Duration::from_secs(1));
        handler.close().await;

        let (mut client, task) = spawn_session(&handler);
        task.await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert_eq!(handler.stats().connections_accepted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_unregisters() {
        let handler = handler(Duration::from_secs(1));
        let (client, task) = spawn_session(&handler);
        wait_for_sessions(&handler, 1).await;

        drop(client);
        task.await.unwrap();
        assert_eq!(handler.active_sessions(), 0);
        assert_eq!(handler.stats().connections_accepted.load(Ordering::Relaxed), 1);
    }
}
