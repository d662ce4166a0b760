//! Relay fixture: a server on TCP loopback plus helpers to attach clients
//!
//! # Example
//!
//! ```no_run
//! use veil_integration_tests::fixtures::RelayFixture;
//!
//! #[tokio::test]
//! async fn test_basic_relay() {
//!     let relay = RelayFixture::start().await;
//!     let alice = relay.connect().await;
//!     let bob = relay.connect().await;
//!     relay.wait_for_counts(2, 0).await;
//!
//!     alice.send(bob.public_key(), b"hi").await.unwrap();
//!     assert_eq!(bob.recv().await.unwrap().data, b"hi");
//! }
//! ```

use crate::test_helpers::{ci_timeout, wait_until};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use veil_relay::{Client, RelayError, SecretKey, Server, ServerConfig};

/// A running relay with a TCP accept loop
pub struct RelayFixture {
    /// The relay under test
    pub server: Server,
    /// Loopback address the relay listens on
    pub addr: SocketAddr,
    accept_loop: JoinHandle<()>,
    next_label: AtomicUsize,
}

impl RelayFixture {
    /// Start a relay with the default configuration
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    /// Start a relay with a custom configuration
    pub async fn start_with(config: ServerConfig) -> Self {
        let server = Server::with_config(SecretKey::generate(), config).expect("valid config");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");

        let accept_server = server.clone();
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let server = accept_server.clone();
                tokio::spawn(async move {
                    let _ = server.accept(stream, peer.to_string()).await;
                });
            }
        });

        Self {
            server,
            addr,
            accept_loop,
            next_label: AtomicUsize::new(0),
        }
    }

    /// Connect a client with a fresh identity over TCP
    pub async fn connect(&self) -> Client {
        self.connect_as(&SecretKey::generate()).await
    }

    /// Connect a client with the given identity over TCP
    pub async fn connect_as(&self, secret: &SecretKey) -> Client {
        let stream = TcpStream::connect(self.addr).await.expect("connect relay");
        stream.set_nodelay(true).expect("nodelay");
        Client::connect(secret, stream).await.expect("handshake")
    }

    /// Connect a client over an in-memory pipe with `buffer` bytes of capacity
    /// in each direction. Returns the client and the server's accept task.
    pub async fn connect_duplex(
        &self,
        secret: &SecretKey,
        buffer: usize,
    ) -> (Client, JoinHandle<Result<(), RelayError>>) {
        let (server_side, client_side) = tokio::io::duplex(buffer);
        let label = format!("pipe-{}", self.next_label.fetch_add(1, Ordering::Relaxed));
        let server = self.server.clone();
        let task = tokio::spawn(async move { server.accept(server_side, label).await });
        let client = Client::connect(secret, client_side)
            .await
            .expect("handshake");
        (client, task)
    }

    /// Wait until the relay reports `total` sessions and `home` designated homes.
    ///
    /// # Panics
    ///
    /// Panics if the gauges do not settle in time.
    pub async fn wait_for_counts(&self, total: i64, home: i64) {
        let server = &self.server;
        let settled = wait_until(ci_timeout(Duration::from_secs(5)), || {
            server.current_clients() == total && server.current_home_clients() == home
        })
        .await;
        assert!(
            settled,
            "total/home = {}/{}, want {}/{}",
            server.current_clients(),
            server.current_home_clients(),
            total,
            home
        );
    }
}

impl Drop for RelayFixture {
    fn drop(&mut self) {
        self.accept_loop.abort();
        self.server.close();
    }
}
