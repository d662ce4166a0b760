//! Framed wire protocol.
//!
//! Every unit on the wire is `type (1) | length (4, big-endian) | body`.
//! Payload bytes inside `SendPacket`/`RecvPacket` are opaque to the relay.
//!
//! ```text
//! client                                server
//!   │ ◀──────────── ServerKey ──────────── │  magic, server key, challenge
//!   │ ───────────── ClientInfo ──────────▶ │  client key, signed challenge
//!   │ ◀──────────── ServerInfo ─────────── │  limits
//!   │ ───── SendPacket / NotePreferred ──▶ │
//!   │ ◀──── RecvPacket / KeepAlive ─────── │
//! ```

use crate::error::{FrameError, RelayError};
use crate::handshake::{ClientInfo, ServerInfo};
use crate::key::{PUBLIC_KEY_LEN, PublicKey};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Protocol magic carried in the server greeting
pub const MAGIC: [u8; 8] = *b"VEIL\xF0\x9F\x94\x91";

/// Frame header: type byte plus 32-bit length
pub const FRAME_HEADER_LEN: usize = 5;

/// Length of the handshake challenge
pub const CHALLENGE_LEN: usize = 32;

/// Largest payload a client may relay (64 KiB)
pub const MAX_PACKET_SIZE: usize = 64 << 10;

/// Frame type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Server greeting: magic, server key, challenge
    ServerKey = 0x01,
    /// Client identity and signed challenge
    ClientInfo = 0x02,
    /// Server limits, ends the handshake
    ServerInfo = 0x03,
    /// Client asks the relay to deliver a payload
    SendPacket = 0x04,
    /// Relay delivers a payload to its destination
    RecvPacket = 0x05,
    /// Relay liveness signal
    KeepAlive = 0x06,
    /// Client toggles its preferred (home) flag
    NotePreferred = 0x07,
}

impl FrameType {
    /// Parse a type byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ServerKey),
            0x02 => Some(Self::ClientInfo),
            0x03 => Some(Self::ServerInfo),
            0x04 => Some(Self::SendPacket),
            0x05 => Some(Self::RecvPacket),
            0x06 => Some(Self::KeepAlive),
            0x07 => Some(Self::NotePreferred),
            _ => None,
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Server greeting
    ServerKey {
        /// Relay's public key
        server_key: PublicKey,
        /// Fresh random challenge the client must sign
        challenge: [u8; CHALLENGE_LEN],
    },
    /// Client identity
    ClientInfo {
        /// Identity being claimed
        client_key: PublicKey,
        /// Version and challenge signature
        info: ClientInfo,
    },
    /// Server limits
    ServerInfo(ServerInfo),
    /// Delivery request
    SendPacket {
        /// Destination identity
        destination: PublicKey,
        /// Opaque payload
        payload: Vec<u8>,
    },
    /// Delivered packet
    RecvPacket {
        /// Sender identity
        source: PublicKey,
        /// Opaque payload
        payload: Vec<u8>,
    },
    /// Keep-alive
    KeepAlive,
    /// Preferred flag update
    NotePreferred(bool),
    /// A type this build does not know; skipped by readers
    Unknown(u8),
}

impl Frame {
    /// Type byte for this frame
    #[must_use]
    pub fn type_byte(&self) -> u8 {
        match self {
            Frame::ServerKey { .. } => FrameType::ServerKey as u8,
            Frame::ClientInfo { .. } => FrameType::ClientInfo as u8,
            Frame::ServerInfo(_) => FrameType::ServerInfo as u8,
            Frame::SendPacket { .. } => FrameType::SendPacket as u8,
            Frame::RecvPacket { .. } => FrameType::RecvPacket as u8,
            Frame::KeepAlive => FrameType::KeepAlive as u8,
            Frame::NotePreferred(_) => FrameType::NotePreferred as u8,
            Frame::Unknown(t) => *t,
        }
    }

    /// Append the body (without header) to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if a handshake body fails to serialize.
    pub fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), FrameError> {
        match self {
            Frame::ServerKey {
                server_key,
                challenge,
            } => {
                out.extend_from_slice(&MAGIC);
                out.extend_from_slice(server_key.as_bytes());
                out.extend_from_slice(challenge);
            }
            Frame::ClientInfo { client_key, info } => {
                out.extend_from_slice(client_key.as_bytes());
                bincode::serialize_into(&mut *out, info)
                    .map_err(|_| FrameError::Malformed("client info"))?;
            }
            Frame::ServerInfo(info) => {
                bincode::serialize_into(&mut *out, info)
                    .map_err(|_| FrameError::Malformed("server info"))?;
            }
            Frame::SendPacket {
                destination: key,
                payload,
            }
            | Frame::RecvPacket {
                source: key,
                payload,
            } => {
                out.extend_from_slice(key.as_bytes());
                out.extend_from_slice(payload);
            }
            Frame::KeepAlive | Frame::Unknown(_) => {}
            Frame::NotePreferred(preferred) => out.push(u8::from(*preferred)),
        }
        Ok(())
    }

    /// Encode a complete frame including its header.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the body does not fit a 32-bit length.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = vec![0u8; FRAME_HEADER_LEN];
        self.encode_body(&mut out)?;
        let body_len = out.len() - FRAME_HEADER_LEN;
        let len = u32::try_from(body_len).map_err(|_| FrameError::TooLarge {
            max: u32::MAX as usize,
            actual: body_len,
        })?;
        out[0] = self.type_byte();
        out[1..FRAME_HEADER_LEN].copy_from_slice(&len.to_be_bytes());
        Ok(out)
    }

    /// Decode a body for the given type byte.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the body is too short or malformed.
    pub fn decode(frame_type: u8, mut body: Vec<u8>) -> Result<Self, FrameError> {
        let Some(kind) = FrameType::from_u8(frame_type) else {
            return Ok(Frame::Unknown(frame_type));
        };

        match kind {
            FrameType::ServerKey => {
                let expected = MAGIC.len() + PUBLIC_KEY_LEN + CHALLENGE_LEN;
                check_len(&body, expected)?;
                if body[..MAGIC.len()] != MAGIC {
                    return Err(FrameError::Malformed("server key"));
                }
                let key_end = MAGIC.len() + PUBLIC_KEY_LEN;
                let server_key = key_prefix(&body[MAGIC.len()..])?;
                let mut challenge = [0u8; CHALLENGE_LEN];
                challenge.copy_from_slice(&body[key_end..key_end + CHALLENGE_LEN]);
                Ok(Frame::ServerKey {
                    server_key,
                    challenge,
                })
            }
            FrameType::ClientInfo => {
                let client_key = key_prefix(&body)?;
                let info = bincode::deserialize(&body[PUBLIC_KEY_LEN..])
                    .map_err(|_| FrameError::Malformed("client info"))?;
                Ok(Frame::ClientInfo { client_key, info })
            }
            FrameType::ServerInfo => {
                let info = bincode::deserialize(&body)
                    .map_err(|_| FrameError::Malformed("server info"))?;
                Ok(Frame::ServerInfo(info))
            }
            FrameType::SendPacket => {
                let destination = key_prefix(&body)?;
                let payload = body.split_off(PUBLIC_KEY_LEN);
                Ok(Frame::SendPacket {
                    destination,
                    payload,
                })
            }
            FrameType::RecvPacket => {
                let source = key_prefix(&body)?;
                let payload = body.split_off(PUBLIC_KEY_LEN);
                Ok(Frame::RecvPacket { source, payload })
            }
            FrameType::KeepAlive => Ok(Frame::KeepAlive),
            FrameType::NotePreferred => {
                check_len(&body, 1)?;
                Ok(Frame::NotePreferred(body[0] != 0))
            }
        }
    }

    /// Parse one complete frame from the front of `data`.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] on truncated, oversized or malformed input.
    pub fn parse(data: &[u8], max_frame_size: usize) -> Result<(Self, usize), FrameError> {
        check_len(data, FRAME_HEADER_LEN)?;
        let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        if len > max_frame_size {
            return Err(FrameError::TooLarge {
                max: max_frame_size,
                actual: len,
            });
        }
        let end = FRAME_HEADER_LEN + len;
        check_len(data, end)?;
        let frame = Self::decode(data[0], data[FRAME_HEADER_LEN..end].to_vec())?;
        Ok((frame, end))
    }
}

fn check_len(data: &[u8], expected: usize) -> Result<(), FrameError> {
    if data.len() < expected {
        return Err(FrameError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn key_prefix(data: &[u8]) -> Result<PublicKey, FrameError> {
    check_len(data, PUBLIC_KEY_LEN)?;
    PublicKey::from_slice(&data[..PUBLIC_KEY_LEN]).ok_or(FrameError::TooShort {
        expected: PUBLIC_KEY_LEN,
        actual: data.len(),
    })
}

/// Largest frame body accepted for a given payload limit
#[must_use]
pub const fn max_frame_size(max_packet_size: usize) -> usize {
    max_packet_size + PUBLIC_KEY_LEN
}

/// Buffered frame reader over the read half of a connection
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_frame_size,
        }
    }

    /// Change the largest accepted frame body
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] on a clean end-of-stream,
    /// [`RelayError::Frame`] for oversized or malformed frames, and
    /// [`RelayError::Io`] for transport failures.
    pub async fn read_frame(&mut self) -> Result<Frame, RelayError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match self.inner.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(RelayError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                max: self.max_frame_size,
                actual: len,
            }
            .into());
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(Frame::decode(header[0], body)?)
    }
}

/// Buffered frame writer over the write half of a connection
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
    scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            scratch: Vec::new(),
        }
    }

    /// Buffer a frame without flushing.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded or the write fails.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), RelayError> {
        self.scratch.clear();
        frame.encode_body(&mut self.scratch)?;
        let len = u32::try_from(self.scratch.len()).map_err(|_| FrameError::TooLarge {
            max: u32::MAX as usize,
            actual: self.scratch.len(),
        })?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = frame.type_byte();
        header[1..].copy_from_slice(&len.to_be_bytes());
        self.inner.write_all(&header).await?;
        self.inner.write_all(&self.scratch).await?;
        Ok(())
    }

    /// Flush buffered frames to the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the flush fails.
    pub async fn flush(&mut self) -> Result<(), RelayError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing or flushing fails.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), RelayError> {
        self.write_frame(frame).await?;
        self.flush().await
    }

    /// Flush and shut down the write direction.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<(), RelayError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::PROTOCOL_VERSION;

    fn key(id: u8) -> PublicKey {
        PublicKey::from_bytes([id; 32])
    }

    #[test]
    fn test_frame_type_from_u8() {
        assert_eq!(FrameType::from_u8(0x04), Some(FrameType::SendPacket));
        assert_eq!(FrameType::from_u8(0x07), Some(FrameType::NotePreferred));
        assert_eq!(FrameType::from_u8(0x00), None);
        assert_eq!(FrameType::from_u8(0xFF), None);
    }

    #[test]
    fn test_send_packet_layout() {
        let frame = Frame::SendPacket {
            destination: key(9),
            payload: b"hi".to_vec(),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], 0x04);
        assert_eq!(&bytes[1..5], &34u32.to_be_bytes());
        assert_eq!(&bytes[5..37], &[9u8; 32]);
        assert_eq!(&bytes[37..], b"hi");
    }

    #[test]
    fn test_parse_handshake_frames() {
        let frames = [
            Frame::ServerKey {
                server_key: key(1),
                challenge: [2u8; CHALLENGE_LEN],
            },
            Frame::ClientInfo {
                client_key: key(3),
                info: ClientInfo {
                    version: PROTOCOL_VERSION,
                    signature: vec![4u8; 64],
                },
            },
            Frame::ServerInfo(ServerInfo {
                version: PROTOCOL_VERSION,
                max_packet_size: 1024,
                keep_alive_ms: 500,
            }),
        ];
        for frame in frames {
            let bytes = frame.encode().unwrap();
            let (parsed, used) = Frame::parse(&bytes, 4096).unwrap();
            assert_eq!(parsed, frame);
            assert_eq!(used, bytes.len());
        }
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = Frame::ServerKey {
            server_key: key(1),
            challenge: [0u8; CHALLENGE_LEN],
        }
        .encode()
        .unwrap();
        bytes[FRAME_HEADER_LEN] ^= 0xFF;
        assert_eq!(
            Frame::parse(&bytes, 4096),
            Err(FrameError::Malformed("server key"))
        );
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(
            Frame::parse(&[0x04, 0, 0], 4096),
            Err(FrameError::TooShort { .. })
        ));
        // Declares 40 bytes, carries 10
        let mut bytes = vec![0x04, 0, 0, 0, 40];
        bytes.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            Frame::parse(&bytes, 4096),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_send_packet_without_key_is_too_short() {
        assert!(matches!(
            Frame::decode(0x04, vec![1, 2, 3]),
            Err(FrameError::TooShort { expected: 32, .. })
        ));
    }

    #[test]
    fn test_parse_oversized() {
        let bytes = [0x04, 0x00, 0x01, 0x00, 0x00];
        assert_eq!(
            Frame::parse(&bytes, 1024),
            Err(FrameError::TooLarge {
                max: 1024,
                actual: 65536
            })
        );
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let (frame, used) = Frame::parse(&[0x42, 0, 0, 0, 2, 0xAA, 0xBB], 16).unwrap();
        assert_eq!(frame, Frame::Unknown(0x42));
        assert_eq!(used, 7);
    }

    #[test]
    fn test_note_preferred() {
        assert_eq!(Frame::decode(0x07, vec![1]).unwrap(), Frame::NotePreferred(true));
        assert_eq!(Frame::decode(0x07, vec![0]).unwrap(), Frame::NotePreferred(false));
        assert!(Frame::decode(0x07, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_reader_writer_over_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b, max_frame_size(MAX_PACKET_SIZE));

        let sent = Frame::RecvPacket {
            source: key(5),
            payload: vec![0xCD; 300],
        };
        let expected = sent.clone();
        let write = tokio::spawn(async move {
            writer.send(&sent).await.unwrap();
            writer.send(&Frame::KeepAlive).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        assert_eq!(reader.read_frame().await.unwrap(), expected);
        assert_eq!(reader.read_frame().await.unwrap(), Frame::KeepAlive);
        assert!(matches!(
            reader.read_frame().await,
            Err(RelayError::ConnectionClosed)
        ));
        write.await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_rejects_oversized_header() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, 16);
        a.write_all(&[0x04, 0, 0, 1, 0]).await.unwrap();
        assert!(matches!(
            reader.read_frame().await,
            Err(RelayError::Frame(FrameError::TooLarge { max: 16, actual: 256 }))
        ));
    }
}
