//! Relay client.
//!
//! A [`Client`] authenticates to a relay over any [`Conn`] and then exchanges
//! packets with other clients by public key. Sending and receiving use
//! separate halves of the connection and may run concurrently.

use crate::config::MAX_PACKET_SIZE_LIMIT;
use crate::conn::{self, BoxedConn, Conn, ConnReader, ConnWriter};
use crate::error::{FrameError, RelayError};
use crate::frame::{Frame, max_frame_size};
use crate::handshake::{self, ServerInfo};
use crate::key::{PublicKey, SecretKey};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Packet delivered by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Identity of the sender
    pub source: PublicKey,
    /// Opaque payload
    pub data: Vec<u8>,
}

/// Connection to a relay server
pub struct Client {
    public_key: PublicKey,
    server_key: PublicKey,
    server_info: ServerInfo,
    reader: Mutex<ConnReader<BoxedConn>>,
    writer: Mutex<ConnWriter<BoxedConn>>,
    closed: AtomicBool,
}

impl Client {
    /// Perform the handshake over `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Handshake`] if the server greeting is invalid, or
    /// the transport error if the connection fails first.
    pub async fn connect<S>(secret: &SecretKey, conn: S) -> Result<Self, RelayError>
    where
        S: Conn + 'static,
    {
        let conn: BoxedConn = Box::new(conn);
        let (mut reader, mut writer) = conn::framed(conn, max_frame_size(MAX_PACKET_SIZE_LIMIT));
        let (server_key, server_info) =
            handshake::connect(&mut reader, &mut writer, secret).await?;
        debug!(
            server = %server_key,
            max_packet_size = server_info.max_packet_size,
            "connected to relay"
        );

        Ok(Self {
            public_key: secret.public_key(),
            server_key,
            server_info,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }

    /// This client's identity
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The relay's identity
    #[must_use]
    pub fn server_key(&self) -> PublicKey {
        self.server_key
    }

    /// Limits announced by the relay
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Whether the connection is known to be closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send `data` to the client identified by `destination`.
    ///
    /// Delivery is best effort: the relay drops packets for unknown
    /// destinations without telling the sender.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if `data` exceeds the relay's packet
    /// limit, [`RelayError::ConnectionClosed`] after `close`, and the
    /// transport error if the write fails.
    pub async fn send(&self, destination: PublicKey, data: &[u8]) -> Result<(), RelayError> {
        let max = self.server_info.max_packet_size as usize;
        if data.len() > max {
            return Err(FrameError::TooLarge {
                max,
                actual: data.len(),
            }
            .into());
        }
        self.send_frame(&Frame::SendPacket {
            destination,
            payload: data.to_vec(),
        })
        .await
    }

    /// Tell the relay whether this connection should be the home for this
    /// client's identity.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] after `close`, or the
    /// transport error if the write fails.
    pub async fn note_preferred(&self, preferred: bool) -> Result<(), RelayError> {
        self.send_frame(&Frame::NotePreferred(preferred)).await
    }

    /// Wait for the next packet.
    ///
    /// Keep-alives and unknown frame types are skipped.
    ///
    /// # Errors
    ///
    /// Returns an end-of-stream error ([`RelayError::is_eof`]) once the relay
    /// closes the connection, [`RelayError::Frame`] for a malformed frame,
    /// and the transport error if the read fails.
    pub async fn recv(&self) -> Result<ReceivedPacket, RelayError> {
        let mut reader = self.reader.lock().await;
        loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    if e.is_eof() {
                        self.closed.store(true, Ordering::Release);
                    }
                    return Err(e);
                }
            };
            match frame {
                Frame::RecvPacket { source, payload } => {
                    if source.is_zero() {
                        return Err(FrameError::Malformed("zero source key").into());
                    }
                    return Ok(ReceivedPacket {
                        source,
                        data: payload,
                    });
                }
                Frame::KeepAlive => trace!("keep-alive"),
                other => debug!(frame_type = other.type_byte(), "skipping frame"),
            }
        }
    }

    /// Close the write direction of the connection.
    ///
    /// The relay tears the session down on end-of-stream, after which `recv`
    /// returns end-of-stream as well. Calling `close` again does nothing.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the shutdown fails.
    pub async fn close(&self) -> Result<(), RelayError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Err(e) if !e.is_eof() => Err(e),
            _ => Ok(()),
        }
    }

    pub(crate) async fn send_frame(&self, frame: &Frame) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        let result = writer.send(frame).await;
        if let Err(e) = &result {
            if e.is_eof() {
                self.closed.store(true, Ordering::Release);
            }
        }
        result
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("public_key", &self.public_key)
            .field("server_key", &self.server_key)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
