//! Public-key routing table
//!
//! Maps each identity to the sessions currently claiming it and the single
//! session elected to receive its packets.
//!
//! # Architecture
//!
//! ```text
//! SendPacket { dst }
//!        │
//!        ▼
//! ┌─────────────────────┐     ┌──────────────────────────┐
//! │   RoutingTable      │────▶│ RoutingEntry for dst     │
//! │   (DashMap shard)   │     │  members: [S1, S2, ...]  │
//! └─────────────────────┘     │  elected: Preferred(S2)  │
//!                             └────────────┬─────────────┘
//!                                          │
//!                                          ▼
//!                               S2.enqueue(packet)
//! ```
//!
//! Every mutation for one identity happens under that identity's shard lock
//! and re-runs [`elect`], so a lookup after a mutation returns never sees a
//! stale home. Operations on identities in different shards do not contend.

use crate::election::{Candidate, Election, elect};
use crate::key::PublicKey;
use crate::session::Session;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

struct Member {
    session: Arc<Session>,
    candidate: Candidate,
}

struct RoutingEntry {
    members: Vec<Member>,
    elected: Election,
}

impl RoutingEntry {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            elected: Election::Homeless,
        }
    }

    fn position(&self, session: &Session) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.session.id() == session.id())
    }

    /// Re-run the election; returns the change in designated homes (-1, 0, 1)
    fn reelect(&mut self) -> i64 {
        let before = i64::from(self.elected.is_designated());
        let candidates: Vec<Candidate> = self.members.iter().map(|m| m.candidate).collect();
        self.elected = elect(&candidates);
        i64::from(self.elected.is_designated()) - before
    }

    fn home(&self) -> Option<&Arc<Session>> {
        self.elected
            .index()
            .and_then(|i| self.members.get(i))
            .map(|m| &m.session)
    }
}

/// Concurrent identity → session routing table
///
/// Owns the two exported gauges: registered sessions and designated homes.
pub struct RoutingTable {
    entries: DashMap<PublicKey, RoutingEntry>,

    /// Sessions currently registered
    clients: AtomicI64,

    /// Identities whose elected session is preference-designated
    home_clients: AtomicI64,

    /// Logical clock ordering preference toggles
    preference_clock: AtomicU64,
}

impl RoutingTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            clients: AtomicI64::new(0),
            home_clients: AtomicI64::new(0),
            preference_clock: AtomicU64::new(0),
        }
    }

    /// Add a session under its identity.
    ///
    /// A first session for an identity is immediately routable.
    pub fn register(&self, session: Arc<Session>) {
        let identity = *session.identity();
        let mut entry = self
            .entries
            .entry(identity)
            .or_insert_with(RoutingEntry::new);
        if entry.position(&session).is_some() {
            return;
        }

        tracing::debug!(
            identity = ?identity,
            session = session.id(),
            "registering session"
        );
        entry.members.push(Member {
            session,
            candidate: Candidate::default(),
        });
        self.clients.fetch_add(1, Ordering::SeqCst);
        let delta = entry.reelect();
        self.adjust_homes(delta);
    }

    /// Remove a session, re-electing if it was home.
    ///
    /// Returns `false` if the session was not registered, so repeated calls
    /// leave the gauges untouched.
    pub fn unregister(&self, session: &Session) -> bool {
        let Entry::Occupied(mut occupied) = self.entries.entry(*session.identity()) else {
            return false;
        };

        let now_empty = {
            let entry = occupied.get_mut();
            let Some(pos) = entry.position(session) else {
                return false;
            };
            entry.members.swap_remove(pos);
            self.clients.fetch_sub(1, Ordering::SeqCst);
            let delta = entry.reelect();
            self.adjust_homes(delta);
            entry.members.is_empty()
        };

        if now_empty {
            occupied.remove();
        }
        tracing::debug!(
            identity = ?session.identity(),
            session = session.id(),
            "unregistered session"
        );
        true
    }

    /// Update a session's preferred flag and re-run the election.
    ///
    /// Idempotent: returns `false` and changes nothing if the flag already
    /// holds `preferred` or the session is not registered.
    pub fn set_preferred(&self, session: &Session, preferred: bool) -> bool {
        let Some(mut entry) = self.entries.get_mut(session.identity()) else {
            return false;
        };
        let Some(pos) = entry.position(session) else {
            return false;
        };

        let candidate = &mut entry.members[pos].candidate;
        if candidate.preferred == preferred {
            return false;
        }
        candidate.preferred = preferred;
        if preferred {
            candidate.preferred_at = self.preference_clock.fetch_add(1, Ordering::SeqCst) + 1;
        }

        let delta = entry.reelect();
        self.adjust_homes(delta);
        true
    }

    /// Session that should receive packets for `identity`, if any
    pub fn lookup(&self, identity: &PublicKey) -> Option<Arc<Session>> {
        self.entries
            .get(identity)
            .and_then(|entry| entry.home().cloned())
    }

    /// Whether `session` is currently elected for its identity
    pub fn is_home(&self, session: &Session) -> bool {
        self.entries
            .get(session.identity())
            .and_then(|entry| entry.home().map(|home| home.id() == session.id()))
            .unwrap_or(false)
    }

    /// Whether `session` has its preferred flag set
    pub fn is_preferred(&self, session: &Session) -> bool {
        self.entries
            .get(session.identity())
            .and_then(|entry| {
                entry
                    .position(session)
                    .map(|pos| entry.members[pos].candidate.preferred)
            })
            .unwrap_or(false)
    }

    /// Number of registered sessions
    pub fn current_clients(&self) -> i64 {
        self.clients.load(Ordering::SeqCst)
    }

    /// Number of identities with a designated home
    pub fn current_home_clients(&self) -> i64 {
        self.home_clients.load(Ordering::SeqCst)
    }

    /// Number of identities with at least one session
    pub fn identity_count(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of every registered session
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .members
                    .iter()
                    .map(|m| Arc::clone(&m.session))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Remove every session and return them. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<Session>> {
        let identities: Vec<PublicKey> = self.entries.iter().map(|e| *e.key()).collect();
        let mut drained = Vec::new();
        for identity in identities {
            if let Some((_, entry)) = self.entries.remove(&identity) {
                let count = i64::try_from(entry.members.len()).unwrap_or(i64::MAX);
                self.clients.fetch_sub(count, Ordering::SeqCst);
                if entry.elected.is_designated() {
                    self.adjust_homes(-1);
                }
                drained.extend(entry.members.into_iter().map(|m| m.session));
            }
        }
        tracing::debug!(count = drained.len(), "drained routing table");
        drained
    }

    fn adjust_homes(&self, delta: i64) {
        if delta != 0 {
            self.home_clients.fetch_add(delta, Ordering::SeqCst);
        }
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
