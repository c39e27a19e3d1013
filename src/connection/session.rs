//! Connection Session
//!
//! A [`Session`] owns the write side of one client connection and counts the
//! replies currently being written. That count is what a graceful shutdown
//! drains: [`Session::close`] waits (up to a bound) for it to reach zero, then
//! closes the socket no matter what.
//!
//! ## States
//!
//! ```text
//!   accept ──> Active ──close()──> Draining ──drained / timed out──> Closed
//!                │                                                   ▲
//!                └──────────── read loop ended (close_now) ──────────┘
//! ```
//!
//! A forced close may cut off a reply that is still being written.

use crate::protocol::{FrameError, RespValue};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, trace, warn};

/// The write half of a connection, type-erased so sessions over different
/// transports share one registry.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The frame stream ended or failed
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The session was closed while the operation was pending
    #[error("Session closed")]
    Closed,
}

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Serving requests
    Active = 0,
    /// Shutdown requested; waiting for pending writes
    Draining = 1,
    /// Socket closed
    Closed = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Per-connection state shared between the read loop and the shutdown path.
pub struct Session {
    id: SessionId,
    peer: String,
    writer: Mutex<Option<BoxedWriter>>,
    pending: AtomicUsize,
    idle: Notify,
    state: AtomicU8,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("pending", &self.pending_writes())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Creates an `Active` session around the write half of a connection.
    pub fn new(id: SessionId, peer: impl Into<String>, writer: BoxedWriter) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            peer: peer.into(),
            writer: Mutex::new(Some(writer)),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            state: AtomicU8::new(SessionState::Active as u8),
            shutdown,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Number of replies currently being written.
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Resolves once the session has been force-closed.
    ///
    /// The read loop selects on this so a shutdown also stops reading.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Marks one write as outstanding until the returned guard is dropped.
    pub fn begin_write(&self) -> PendingWrite<'_> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        PendingWrite { session: self }
    }

    /// Writes and flushes one reply, returning the number of bytes sent.
    ///
    /// The write counts as outstanding for its whole duration. If the session
    /// is force-closed mid-write, the write is abandoned with `Closed`.
    pub async fn write_reply(&self, reply: &RespValue) -> Result<usize, ConnectionError> {
        let _pending = self.begin_write();
        let bytes = reply.serialize();

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(ConnectionError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        tokio::select! {
            result = write_flush(stream, &bytes) => {
                result?;
                trace!(session = %self.id, bytes = bytes.len(), "Sent response");
                Ok(bytes.len())
            }
            _ = shutdown.wait_for(|closed| *closed) => Err(ConnectionError::Closed),
        }
    }

    /// Waits until no write is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending_writes() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drains and closes the session.
    ///
    /// Waits up to `timeout` for outstanding writes, then closes the socket
    /// regardless. Returns `true` if the writes drained in time.
    pub async fn close(&self, timeout: Duration) -> bool {
        if self.state() == SessionState::Closed {
            return true;
        }
        self.set_state(SessionState::Draining);

        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();
        if drained {
            debug!(session = %self.id, client = %self.peer, "Session drained");
        } else {
            warn!(
                session = %self.id,
                client = %self.peer,
                pending = self.pending_writes(),
                "Drain timed out, forcing close"
            );
        }

        self.close_now().await;
        drained
    }

    /// Closes the socket immediately, abandoning any write in progress.
    pub async fn close_now(&self) {
        self.shutdown.send_replace(true);

        let writer = self.writer.lock().await.take();
        if let Some(mut stream) = writer {
            if let Err(e) = stream.shutdown().await {
                trace!(session = %self.id, error = %e, "Shutdown of write half failed");
            }
        }
        self.set_state(SessionState::Closed);
    }
}

async fn write_flush(stream: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}

/// An outstanding write, released on drop.
#[must_use = "the write is only outstanding while this guard is held"]
pub struct PendingWrite<'a> {
    session: &'a Session,
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        if self.session.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.session.idle.notify_waiters();
        }
    }
}
