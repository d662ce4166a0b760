//! Connection handshake.
//!
//! The server proves nothing; the client proves possession of the secret key
//! for the identity it claims by signing a fresh server challenge.

use crate::error::{HandshakeError, RelayError};
use crate::frame::{CHALLENGE_LEN, Frame, FrameReader, FrameWriter};
use crate::key::{PublicKey, SecretKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Wire protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body accepted while the handshake is in progress.
///
/// Covers `ClientInfo` (key, version, length-prefixed signature) independent
/// of the configured packet limit.
pub const HANDSHAKE_MAX_FRAME: usize = 256;

/// Domain separator for challenge signatures
const AUTH_CONTEXT: &[u8] = b"veil-relay/v1";

/// Client half of the handshake, sent after the server greeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Protocol version spoken by the client
    pub version: u32,
    /// Ed25519 signature over [`auth_message`]
    pub signature: Vec<u8>,
}

/// Limits announced by the server once the client is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Protocol version spoken by the server
    pub version: u32,
    /// Largest payload the server relays
    pub max_packet_size: u32,
    /// Keep-alive interval in milliseconds
    pub keep_alive_ms: u64,
}

/// Bytes a client signs to authenticate
#[must_use]
pub fn auth_message(server_key: &PublicKey, challenge: &[u8; CHALLENGE_LEN]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(AUTH_CONTEXT.len() + 32 + CHALLENGE_LEN);
    msg.extend_from_slice(AUTH_CONTEXT);
    msg.extend_from_slice(server_key.as_bytes());
    msg.extend_from_slice(challenge);
    msg
}

/// Fresh random challenge
#[must_use]
pub fn new_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Run the server side of the handshake and return the verified client identity.
///
/// Does not bound its own duration; callers wrap it in a timeout.
///
/// # Errors
///
/// Returns [`RelayError::Handshake`] if the client's identity does not verify
/// and a transport error if the connection fails mid-handshake.
pub async fn accept<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    secret: &SecretKey,
    server_info: &ServerInfo,
) -> Result<PublicKey, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let server_key = secret.public_key();
    let challenge = new_challenge();
    writer
        .send(&Frame::ServerKey {
            server_key,
            challenge,
        })
        .await?;

    let (client_key, info) = match reader.read_frame().await? {
        Frame::ClientInfo { client_key, info } => (client_key, info),
        other => return Err(HandshakeError::UnexpectedFrame(other.type_byte()).into()),
    };

    if info.version != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(info.version).into());
    }
    client_key.verify(&auth_message(&server_key, &challenge), &info.signature)?;

    writer.send(&Frame::ServerInfo(server_info.clone())).await?;
    Ok(client_key)
}

/// Run the client side of the handshake.
///
/// Returns the server's public key and announced limits.
///
/// # Errors
///
/// Returns [`RelayError::Handshake`] if the server greeting is malformed and a
/// transport error if the connection fails mid-handshake.
pub async fn connect<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    secret: &SecretKey,
) -> Result<(PublicKey, ServerInfo), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (server_key, challenge) = match reader.read_frame().await {
        Ok(Frame::ServerKey {
            server_key,
            challenge,
        }) => (server_key, challenge),
        Ok(other) => return Err(HandshakeError::UnexpectedFrame(other.type_byte()).into()),
        Err(RelayError::Frame(_)) => return Err(HandshakeError::BadMagic.into()),
        Err(e) => return Err(e),
    };

    let signature = secret.sign(&auth_message(&server_key, &challenge)).to_vec();
    writer
        .send(&Frame::ClientInfo {
            client_key: secret.public_key(),
            info: ClientInfo {
                version: PROTOCOL_VERSION,
                signature,
            },
        })
        .await?;

    match reader.read_frame().await? {
        Frame::ServerInfo(info) => Ok((server_key, info)),
        other => Err(HandshakeError::UnexpectedFrame(other.type_byte()).into()),
    }
}
