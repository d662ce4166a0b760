//! Server-side client sessions.
//!
//! A [`Session`] is one authenticated connection claiming a [`PublicKey`]. It
//! owns a bounded outbound queue that only its own drain task empties, so a
//! slow reader can only ever stall itself.

use crate::error::{EnqueueError, RelayError};
use crate::frame::{Frame, FrameWriter};
use crate::key::PublicKey;
use crate::metrics::Metrics;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout};

/// Process-unique session identifier
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A packet waiting in a destination's outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sender identity
    pub source: PublicKey,
    /// Opaque payload
    pub payload: Vec<u8>,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection
    PeerClosed,
    /// Read or write failed
    TransportError,
    /// Peer sent something the relay cannot accept
    ProtocolError,
    /// Outbound queue overflowed
    QueueFull,
    /// A write exceeded the write timeout
    WriteTimeout,
    /// Server is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::TransportError => "transport error",
            CloseReason::ProtocolError => "protocol error",
            CloseReason::QueueFull => "queue full",
            CloseReason::WriteTimeout => "write timeout",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// One live connection claiming an identity
pub struct Session {
    id: SessionId,
    identity: PublicKey,
    label: String,
    queue: mpsc::Sender<Packet>,
    closed: watch::Sender<bool>,
    close_reason: OnceLock<CloseReason>,
    connected_at: Instant,
    /// Milliseconds after `connected_at` of the last completed write
    last_write_ms: AtomicU64,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue
    #[must_use]
    pub fn new(
        identity: PublicKey,
        label: impl Into<String>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Packet>) {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let (closed, _) = watch::channel(false);
        let session = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            label: label.into(),
            queue,
            closed,
            close_reason: OnceLock::new(),
            connected_at: Instant::now(),
            last_write_ms: AtomicU64::new(0),
        };
        (session, rx)
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identity claimed at handshake
    #[must_use]
    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    /// Connection label given to `accept`
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// When the handshake completed
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// When the last frame was written to the transport
    #[must_use]
    pub fn last_write(&self) -> Instant {
        self.connected_at + Duration::from_millis(self.last_write_ms.load(Ordering::Relaxed))
    }

    fn note_write(&self) {
        let elapsed = u64::try_from(self.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_write_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Hand a packet to this session's outbound queue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Closed`] once the session is closing and
    /// [`EnqueueError::Full`] if the queue is at capacity.
    pub fn enqueue(&self, packet: Packet) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.queue.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Packets currently waiting to be written
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Close the session. Returns `true` for the first call only.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = !self.closed.send_replace(true);
        if first {
            let _ = self.close_reason.set(reason);
        }
        first
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Reason given to the first `close`
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Resolves once the session is closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        signalled(&mut rx).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Wait until a boolean watch channel reads `true` or its sender is gone
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Timing knobs for the drain task
#[derive(Debug, Clone, Copy)]
pub(crate) struct DrainConfig {
    pub write_timeout: Duration,
    pub keep_alive_interval: Duration,
}

/// Drain a session's outbound queue to its transport.
///
/// Every write is bounded by the write timeout; exceeding it closes the
/// session. Returns when the session closes or a write fails.
pub(crate) async fn drain<W>(
    session: Arc<Session>,
    mut queue: mpsc::Receiver<Packet>,
    mut writer: FrameWriter<W>,
    config: DrainConfig,
    metrics: Arc<Metrics>,
) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    let start = tokio::time::Instant::now() + config.keep_alive_interval;
    let mut keep_alive = interval_at(start, config.keep_alive_interval);

    loop {
        let frame = tokio::select! {
            biased;
            () = session.closed() => break,
            packet = queue.recv() => match packet {
                Some(packet) => Frame::RecvPacket {
                    source: packet.source,
                    payload: packet.payload,
                },
                None => break,
            },
            _ = keep_alive.tick() => Frame::KeepAlive,
        };

        let is_keep_alive = frame == Frame::KeepAlive;
        let written = tokio::select! {
            biased;
            () = session.closed() => break,
            result = timeout(config.write_timeout, writer.send(&frame)) => result,
        };

        match written {
            Ok(Ok(())) => {
                session.note_write();
                keep_alive.reset();
                if is_keep_alive {
                    metrics.keep_alives_sent.inc();
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "write failed");
                session.close(CloseReason::TransportError);
                return Err(e);
            }
            Err(_) => {
                metrics.write_timeouts.inc();
                tracing::warn!(
                    timeout = ?config.write_timeout,
                    queued = session.queued(),
                    "write timed out, dropping client"
                );
                session.close(CloseReason::WriteTimeout);
                return Err(RelayError::WriteTimeout(config.write_timeout));
            }
        }
    }

    Ok(())
}
