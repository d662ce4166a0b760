//! Error types for the Veil relay.

use std::io;
use thiserror::Error;

/// Top-level relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport I/O failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Frame encoding or decoding error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Handshake rejected or failed
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The connection reached end-of-stream or was closed locally
    #[error("connection closed")]
    ConnectionClosed,

    /// A transport write did not complete within the write timeout
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    /// The relay dropped the session because its outbound queue overflowed
    #[error("outbound queue full")]
    QueueFull,

    /// The server has been shut down
    #[error("server closed")]
    ServerClosed,
}

impl RelayError {
    /// Returns `true` if this error means the stream ended rather than failed.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        match self {
            RelayError::ConnectionClosed => true,
            RelayError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Frame-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Frame body too short for its type
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Declared frame length exceeds the allowed maximum
    #[error("frame too large: max {max}, got {actual}")]
    TooLarge {
        /// Maximum allowed length
        max: usize,
        /// Declared length
        actual: usize,
    },

    /// Body could not be decoded
    #[error("malformed {0} frame")]
    Malformed(&'static str),
}

/// Handshake errors. Any of these rejects the connection before a session exists.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Server greeting did not carry the protocol magic
    #[error("bad protocol magic")]
    BadMagic,

    /// Peer presented the zero key
    #[error("zero public key")]
    ZeroKey,

    /// Key bytes are not a valid Ed25519 point
    #[error("invalid public key")]
    InvalidKey,

    /// Signature over the challenge did not verify
    #[error("signature verification failed")]
    BadSignature,

    /// Peer speaks an unsupported protocol version
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// A frame other than the expected handshake frame arrived
    #[error("unexpected frame type 0x{0:02X} during handshake")]
    UnexpectedFrame(u8),

    /// Handshake did not complete in time
    #[error("handshake timed out")]
    Timeout,
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds an unusable value
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Outcome of handing a packet to a destination session's queue
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Outbound queue is at capacity
    #[error("outbound queue full")]
    Full,

    /// Session is closed or closing
    #[error("session closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_classification() {
        assert!(RelayError::ConnectionClosed.is_eof());
        assert!(RelayError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_eof());
        assert!(RelayError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_eof());
        assert!(!RelayError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_eof());
        assert!(!RelayError::ServerClosed.is_eof());
    }

    #[test]
    fn test_error_display() {
        let err = FrameError::TooLarge { max: 10, actual: 20 };
        assert_eq!(err.to_string(), "frame too large: max 10, got 20");

        let err = HandshakeError::UnexpectedFrame(0x04);
        assert_eq!(err.to_string(), "unexpected frame type 0x04 during handshake");
    }
}
