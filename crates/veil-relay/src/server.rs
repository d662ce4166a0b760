//! Relay server.
//!
//! [`Server::accept`] owns one connection's whole lifecycle: handshake,
//! registration, the inbound read loop, and teardown. Each accepted session
//! gets a dedicated drain task for its outbound queue, so the read loop never
//! waits on any destination.

use crate::config::ServerConfig;
use crate::conn::{self, Conn};
use crate::error::{ConfigError, EnqueueError, HandshakeError, RelayError};
use crate::frame::{Frame, FrameReader, max_frame_size};
use crate::handshake::{self, HANDSHAKE_MAX_FRAME, PROTOCOL_VERSION, ServerInfo};
use crate::key::{PublicKey, SecretKey};
use crate::metrics::{Metrics, ServerStats};
use crate::routing::RoutingTable;
use crate::session::{self, CloseReason, DrainConfig, Packet, Session, signalled};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{Instrument, Span, debug, info, warn};

/// Diagnostics for one live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Label given to `accept`
    pub label: String,
    /// Authenticated identity
    pub identity: PublicKey,
    /// Preferred flag
    pub preferred: bool,
    /// Currently elected to receive packets for its identity
    pub home: bool,
    /// Time since the handshake completed
    pub connected_for: Duration,
    /// Time since the last completed write
    pub since_last_write: Duration,
    /// Packets waiting in the outbound queue
    pub queued: usize,
}

/// Blind packet relay
///
/// Cheap to clone; clones share the same routing table and counters.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    secret: SecretKey,
    config: RwLock<ServerConfig>,
    routes: RoutingTable,
    metrics: Arc<Metrics>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Create a server with the default configuration
    #[must_use]
    pub fn new(secret: SecretKey) -> Self {
        Self::build(secret, ServerConfig::default())
    }

    /// Create a server with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the configuration is invalid.
    pub fn with_config(secret: SecretKey, config: ServerConfig) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self::build(secret, config))
    }

    fn build(secret: SecretKey, config: ServerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        info!(public_key = %secret.public_key(), "relay server created");
        Self {
            inner: Arc::new(Inner {
                secret,
                config: RwLock::new(config),
                routes: RoutingTable::new(),
                metrics: Arc::new(Metrics::default()),
                shutdown,
            }),
        }
    }

    /// The server's public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.inner.secret.public_key()
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> ServerConfig {
        self.inner.config()
    }

    /// Change the write timeout for sessions accepted from now on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero timeout.
    pub fn set_write_timeout(&self, write_timeout: Duration) -> Result<(), ConfigError> {
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let updated = ServerConfig {
            write_timeout,
            ..(*config).clone()
        };
        updated.validate()?;
        *config = updated;
        Ok(())
    }

    /// Serve one connection until it ends.
    ///
    /// Performs the handshake, registers the session, relays its frames and
    /// unregisters it on exit. Returns `Ok(())` when the peer or the server
    /// closed the connection cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ServerClosed`] if the server is shut down,
    /// [`RelayError::Handshake`] if the peer fails authentication, and
    /// transport, framing or write-timeout errors that ended the session.
    pub async fn accept<S>(&self, conn: S, label: impl Into<String>) -> Result<(), RelayError>
    where
        S: Conn + 'static,
    {
        let label = label.into();
        let span = tracing::info_span!("session", label = %label, peer = tracing::field::Empty);
        Arc::clone(&self.inner).serve(conn, label).instrument(span).await
    }

    /// Shut the server down.
    ///
    /// Stops accepting, closes every live session (their peers observe
    /// end-of-stream) and clears the routing table. Later calls do nothing.
    pub fn close(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        let sessions = self.inner.routes.drain_all();
        info!(sessions = sessions.len(), "closing relay server");
        for session in sessions {
            session.close(CloseReason::Shutdown);
        }
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of registered sessions
    #[must_use]
    pub fn current_clients(&self) -> i64 {
        self.inner.routes.current_clients()
    }

    /// Number of identities with a designated home session
    #[must_use]
    pub fn current_home_clients(&self) -> i64 {
        self.inner.routes.current_home_clients()
    }

    /// Gauges and counters
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            current_clients: self.current_clients(),
            current_home_clients: self.current_home_clients(),
            identities: self.inner.routes.identity_count(),
            counters: self.inner.metrics.snapshot(),
        }
    }

    /// Diagnostics for every registered session
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let routes = &self.inner.routes;
        routes
            .sessions()
            .into_iter()
            .map(|s| SessionInfo {
                label: s.label().to_string(),
                identity: *s.identity(),
                preferred: routes.is_preferred(&s),
                home: routes.is_home(&s),
                connected_for: s.connected_at().elapsed(),
                since_last_write: s.last_write().elapsed(),
                queued: s.queued(),
            })
            .collect()
    }
}

impl Inner {
    fn config(&self) -> ServerConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn serve<S>(self: Arc<Self>, conn: S, label: String) -> Result<(), RelayError>
    where
        S: Conn + 'static,
    {
        if self.is_closed() {
            return Err(RelayError::ServerClosed);
        }
        self.metrics.accepts.inc();

        let config = self.config();
        let packet_frame_limit = max_frame_size(config.max_packet_size);
        let (mut reader, mut writer) =
            conn::framed(conn, packet_frame_limit.max(HANDSHAKE_MAX_FRAME));
        let server_info = ServerInfo {
            version: PROTOCOL_VERSION,
            max_packet_size: u32::try_from(config.max_packet_size).unwrap_or(u32::MAX),
            keep_alive_ms: u64::try_from(config.keep_alive_interval.as_millis())
                .unwrap_or(u64::MAX),
        };

        let mut shutdown = self.shutdown.subscribe();
        let handshake = tokio::time::timeout(
            config.handshake_timeout,
            handshake::accept(&mut reader, &mut writer, &self.secret, &server_info),
        );
        let identity = tokio::select! {
            biased;
            () = signalled(&mut shutdown) => return Err(RelayError::ServerClosed),
            result = handshake => match result {
                Ok(Ok(identity)) => identity,
                Ok(Err(e)) => {
                    self.metrics.handshake_failures.inc();
                    warn!(error = %e, "handshake failed");
                    return Err(e);
                }
                Err(_) => {
                    self.metrics.handshake_failures.inc();
                    warn!(timeout = ?config.handshake_timeout, "handshake timed out");
                    return Err(HandshakeError::Timeout.into());
                }
            },
        };
        Span::current().record("peer", tracing::field::display(identity));
        reader.set_max_frame_size(packet_frame_limit);

        let (session, queue) = Session::new(identity, label, config.queue_capacity);
        let session = Arc::new(session);
        self.routes.register(Arc::clone(&session));
        if self.is_closed() {
            // Raced with close(); tear down through the normal path
            session.close(CloseReason::Shutdown);
        }
        info!(clients = self.routes.current_clients(), "client connected");

        let drain = tokio::spawn(
            session::drain(
                Arc::clone(&session),
                queue,
                writer,
                DrainConfig {
                    write_timeout: config.write_timeout,
                    keep_alive_interval: config.keep_alive_interval,
                },
                Arc::clone(&self.metrics),
            )
            .instrument(Span::current()),
        );

        let read_result = self.read_loop(&session, &mut reader).await;
        let reason = match &read_result {
            Ok(()) => CloseReason::PeerClosed,
            Err(RelayError::Frame(_)) => CloseReason::ProtocolError,
            Err(_) => CloseReason::TransportError,
        };
        session.close(reason);
        self.routes.unregister(&session);
        drop(reader);

        let drain_result = match drain.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "drain task failed");
                Ok(())
            }
        };

        info!(
            reason = %session.close_reason().unwrap_or(reason),
            clients = self.routes.current_clients(),
            "client disconnected"
        );

        match (read_result, drain_result) {
            (Err(e), _) if !e.is_eof() => Err(e),
            (_, Err(e)) if !e.is_eof() => Err(e),
            _ if session.close_reason() == Some(CloseReason::QueueFull) => {
                Err(RelayError::QueueFull)
            }
            _ => Ok(()),
        }
    }

    async fn read_loop<R>(
        &self,
        session: &Arc<Session>,
        reader: &mut FrameReader<R>,
    ) -> Result<(), RelayError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frame = tokio::select! {
                biased;
                () = session.closed() => return Ok(()),
                frame = reader.read_frame() => frame,
            };
            match frame {
                Ok(frame) => self.handle_frame(session, frame),
                Err(e) if e.is_eof() => return Ok(()),
                Err(e) => {
                    debug!(error = %e, "read failed");
                    return Err(e);
                }
            }
        }
    }

    fn handle_frame(&self, session: &Session, frame: Frame) {
        match frame {
            Frame::SendPacket {
                destination,
                payload,
            } => self.forward(session, destination, payload),
            Frame::NotePreferred(preferred) => {
                if self.routes.set_preferred(session, preferred) {
                    self.metrics.preference_changes.inc();
                    debug!(
                        preferred,
                        homes = self.routes.current_home_clients(),
                        "preference changed"
                    );
                }
            }
            Frame::KeepAlive => {}
            other => debug!(frame_type = other.type_byte(), "ignoring frame"),
        }
    }

    /// Route one packet. Never waits on the destination.
    fn forward(&self, from: &Session, destination: PublicKey, payload: Vec<u8>) {
        self.metrics.packets_received.inc();
        debug_assert!(!from.identity().is_zero(), "authenticated sessions never have a zero key");
        if destination.is_zero() {
            self.metrics.packets_dropped_no_route.inc();
            debug!("dropping packet for zero key");
            return;
        }

        let Some(dst) = self.routes.lookup(&destination) else {
            self.metrics.packets_dropped_no_route.inc();
            debug!(dst = ?destination, "no home for destination, dropping packet");
            return;
        };

        let len = payload.len() as u64;
        let packet = Packet {
            source: *from.identity(),
            payload,
        };
        match dst.enqueue(packet) {
            Ok(()) => {
                self.metrics.packets_forwarded.inc();
                self.metrics.bytes_forwarded.add(len);
            }
            Err(EnqueueError::Full) => {
                self.metrics.packets_dropped_queue_full.inc();
                warn!(
                    dst = ?destination,
                    dst_label = dst.label(),
                    "outbound queue full, dropping client"
                );
                dst.close(CloseReason::QueueFull);
                self.routes.unregister(&dst);
            }
            Err(EnqueueError::Closed) => {
                self.metrics.packets_dropped_closed.inc();
                self.routes.unregister(&dst);
            }
        }
    }
}
