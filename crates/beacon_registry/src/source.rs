//! Data-origin identity.
//!
//! Every registry mutation is attributed to a [`Source`]: who asserted the
//! data. The same logical instance may be described by several sources at
//! once (its own registration plus replicated copies from peers), and the
//! origin category drives arbitration precedence: `Local > Replicated >
//! Bootstrap`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Category of a data origin, in descending arbitration precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Replicated,
    Bootstrap,
}

impl Origin {
    /// Fixed precedence used by winner arbitration. Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Origin::Local => 2,
            Origin::Replicated => 1,
            Origin::Bootstrap => 0,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Replicated => write!(f, "replicated"),
            Origin::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a data origin. Immutable; equality is over all three fields.
///
/// Ids are unique per process by default ([`Source::new`]); the replication
/// layer pins ids received on the wire with [`Source::with_id`], typically a
/// per-peer replication session sequence number, so eviction matchers can
/// select "all sources from peer P older than session N".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub origin: Origin,
    pub name: String,
    pub id: u64,
}

impl Source {
    /// New source with a process-wide monotonic id.
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// New source with an externally assigned id.
    pub fn with_id(origin: Origin, name: impl Into<String>, id: u64) -> Self {
        Self {
            origin,
            name: name.into(),
            id,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(Origin::Local, name)
    }

    pub fn replicated(name: impl Into<String>) -> Self {
        Self::new(Origin::Replicated, name)
    }

    pub fn bootstrap(name: impl Into<String>) -> Self {
        Self::new(Origin::Bootstrap, name)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.origin, self.name, self.id)
    }
}

/// Predicate over sources, used by eviction sweeps.
#[derive(Clone)]
pub struct SourceMatcher(Arc<dyn Fn(&Source) -> bool + Send + Sync>);

impl SourceMatcher {
    pub fn new(f: impl Fn(&Source) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// All sources of the given origin.
    pub fn by_origin(origin: Origin) -> Self {
        Self::new(move |s| s.origin == origin)
    }

    /// All sources of the given origin and name (e.g. every copy a peer sent).
    pub fn by_origin_name(origin: Origin, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |s| s.origin == origin && s.name == name)
    }

    /// Sources from the given origin/name whose id predates `latest`.
    /// The usual "stale replication session" matcher.
    pub fn older_than(origin: Origin, name: impl Into<String>, latest: u64) -> Self {
        let name = name.into();
        Self::new(move |s| s.origin == origin && s.name == name && s.id < latest)
    }

    /// Logical complement, for evict-all-except sweeps.
    pub fn negate(&self) -> Self {
        let inner = self.0.clone();
        Self::new(move |s| !inner(s))
    }

    pub fn matches(&self, source: &Source) -> bool {
        (self.0)(source)
    }
}

impl fmt::Debug for SourceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SourceMatcher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_are_monotonic() {
        let a = Source::local("c1");
        let b = Source::local("c1");
        assert!(b.id > a.id);
        assert_ne!(a, b);
    }

    #[test]
    fn equality_covers_all_fields() {
        let a = Source::with_id(Origin::Replicated, "peer1", 7);
        let b = Source::with_id(Origin::Replicated, "peer1", 7);
        let c = Source::with_id(Origin::Replicated, "peer2", 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn older_than_matcher_selects_stale_sessions() {
        let m = SourceMatcher::older_than(Origin::Replicated, "peer1", 5);
        assert!(m.matches(&Source::with_id(Origin::Replicated, "peer1", 4)));
        assert!(!m.matches(&Source::with_id(Origin::Replicated, "peer1", 5)));
        assert!(!m.matches(&Source::with_id(Origin::Replicated, "peer2", 1)));
        assert!(!m.matches(&Source::with_id(Origin::Local, "peer1", 1)));
    }

    #[test]
    fn negate_inverts() {
        let m = SourceMatcher::by_origin(Origin::Bootstrap);
        assert!(!m.negate().matches(&Source::bootstrap("seed")));
        assert!(m.negate().matches(&Source::local("c1")));
    }
}
