//! # Veil Relay
//!
//! Blind packet relay. Clients authenticate with an Ed25519 public key and
//! exchange opaque packets addressed by key; the relay never inspects
//! payloads.
//!
//! This crate provides:
//! - Wire framing and the authenticated handshake
//! - Per-connection sessions with bounded outbound queues
//! - A routing table with home election per identity
//! - Client and home gauges plus traffic counters
//! - The relay server and a matching client
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  SendPacket   ┌────────────────────────────────┐
//! │ Client A │ ────────────► │ read loop (A)                  │
//! └──────────┘               │   └─► RoutingTable::lookup(B)  │
//!                            │         └─► Session(B).enqueue │
//!                            ├────────────────────────────────┤
//! ┌──────────┐  RecvPacket   │ drain task (B)                 │
//! │ Client B │ ◄──────────── │   bounded queue, write timeout │
//! └──────────┘               └────────────────────────────────┘
//! ```
//!
//! A slow or stalled receiver only fills its own queue. When the queue is
//! full or a write exceeds the timeout, that one session is dropped and every
//! other flow keeps moving.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod conn;
pub mod election;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod key;
pub mod metrics;
pub mod routing;
pub mod server;
pub mod session;

pub use client::{Client, ReceivedPacket};
pub use config::ServerConfig;
pub use conn::{BoxedConn, Conn};
pub use error::{ConfigError, EnqueueError, FrameError, HandshakeError, RelayError};
pub use frame::{Frame, FrameReader, FrameType, FrameWriter, MAX_PACKET_SIZE};
pub use handshake::{PROTOCOL_VERSION, ServerInfo};
pub use key::{PublicKey, SecretKey};
pub use metrics::{Metrics, MetricsSnapshot, ServerStats};
pub use routing::RoutingTable;
pub use server::{Server, SessionInfo};
pub use session::{CloseReason, Packet, Session, SessionId};
