//! Relay accounting.
//!
//! Counters are plain atomics so they can be read at any time without
//! touching the routing table's locks.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Add one
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Server-wide counters
#[derive(Debug, Default)]
pub struct Metrics {
    /// Connections handed to `accept`
    pub accepts: Counter,
    /// Connections rejected during the handshake
    pub handshake_failures: Counter,
    /// `SendPacket` frames read from clients
    pub packets_received: Counter,
    /// Packets placed on a destination queue
    pub packets_forwarded: Counter,
    /// Payload bytes placed on destination queues
    pub bytes_forwarded: Counter,
    /// Packets dropped because the destination had no home
    pub packets_dropped_no_route: Counter,
    /// Packets dropped because the destination queue was full
    pub packets_dropped_queue_full: Counter,
    /// Packets dropped because the destination was closing
    pub packets_dropped_closed: Counter,
    /// Sessions dropped for exceeding the write timeout
    pub write_timeouts: Counter,
    /// Keep-alive frames written
    pub keep_alives_sent: Counter,
    /// Preferred-flag changes that took effect
    pub preference_changes: Counter,
}

impl Metrics {
    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepts: self.accepts.get(),
            handshake_failures: self.handshake_failures.get(),
            packets_received: self.packets_received.get(),
            packets_forwarded: self.packets_forwarded.get(),
            bytes_forwarded: self.bytes_forwarded.get(),
            packets_dropped_no_route: self.packets_dropped_no_route.get(),
            packets_dropped_queue_full: self.packets_dropped_queue_full.get(),
            packets_dropped_closed: self.packets_dropped_closed.get(),
            write_timeouts: self.write_timeouts.get(),
            keep_alives_sent: self.keep_alives_sent.get(),
            preference_changes: self.preference_changes.get(),
        }
    }
}

/// Serializable copy of [`Metrics`]; fields mirror the counters
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub accepts: u64,
    pub handshake_failures: u64,
    pub packets_received: u64,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub packets_dropped_no_route: u64,
    pub packets_dropped_queue_full: u64,
    pub packets_dropped_closed: u64,
    pub write_timeouts: u64,
    pub keep_alives_sent: u64,
    pub preference_changes: u64,
}

impl MetricsSnapshot {
    /// Packets dropped for any reason
    #[must_use]
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped_no_route + self.packets_dropped_queue_full + self.packets_dropped_closed
    }
}

/// Live gauges plus counters, as exported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Sessions currently registered
    pub current_clients: i64,
    /// Identities whose elected session is a designated (preferred) home
    pub current_home_clients: i64,
    /// Distinct identities with at least one session
    pub identities: usize,
    /// Counters
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::default();
        c.inc();
        c.add(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_snapshot_and_dropped_total() {
        let m = Metrics::default();
        m.packets_dropped_no_route.add(2);
        m.packets_dropped_queue_full.inc();
        m.packets_dropped_closed.add(3);
        m.packets_forwarded.add(10);

        let snap = m.snapshot();
        assert_eq!(snap.packets_forwarded, 10);
        assert_eq!(snap.packets_dropped(), 6);
    }

    #[test]
    fn test_stats_serialize_flat() {
        let stats = ServerStats {
            current_clients: 3,
            current_home_clients: 1,
            identities: 3,
            counters: MetricsSnapshot {
                accepts: 4,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["current_clients"], 3);
        assert_eq!(json["current_home_clients"], 1);
        assert_eq!(json["accepts"], 4);
    }
}
