//! Home election.
//!
//! Pure function over the sessions sharing one identity. The routing table
//! calls it after every membership or preference change.

/// Election-relevant state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Candidate {
    /// Client marked this connection as preferred
    pub preferred: bool,
    /// Logical time of the most recent `preferred = true` toggle
    pub preferred_at: u64,
}

/// Election outcome for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Election {
    /// Several non-preferred sessions and none designated: packets are dropped
    Homeless,
    /// The only session for the identity; routable but not designated
    Sole(usize),
    /// Most recently preferred session; designated home
    Preferred(usize),
}

impl Election {
    /// Index of the session that receives packets, if any
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Election::Homeless => None,
            Election::Sole(i) | Election::Preferred(i) => Some(*i),
        }
    }

    /// Whether the elected session counts as a designated home
    #[must_use]
    pub fn is_designated(&self) -> bool {
        matches!(self, Election::Preferred(_))
    }
}

/// Elect the home among `candidates`.
///
/// The preferred candidate with the latest toggle wins. With no preferred
/// candidate a lone session is elected, otherwise nobody is.
#[must_use]
pub fn elect(candidates: &[Candidate]) -> Election {
    let latest = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.preferred)
        .max_by_key(|(_, c)| c.preferred_at);

    match latest {
        Some((i, _)) => Election::Preferred(i),
        None if candidates.len() == 1 => Election::Sole(0),
        None => Election::Homeless,
    }
}
