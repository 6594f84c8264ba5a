//! Lock identifiers for task admission.
//!
//! Every task declares the resources it touches as [`LockTarget`]s. A
//! target canonicalizes to its connection plus the DN's segments in
//! root-first order, so the ancestor/descendant relation between two
//! targets reduces to a prefix test. The test runs segment-wise rather
//! than on a joined string: DN values may contain arbitrary characters,
//! and a string prefix check would conflate `ou=user` with `ou=users`.

use dirmirror_core::dn::Dn;
use std::fmt;

/// One resource a task intends to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTarget {
    pub connection_id: String,
    pub dn: Dn,
}

impl LockTarget {
    pub fn new(connection_id: impl Into<String>, dn: Dn) -> Self {
        Self {
            connection_id: connection_id.into(),
            dn,
        }
    }
}

/// Canonical lock identifier: connection plus root-first normalized
/// segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockId {
    connection: String,
    segments: Vec<String>,
}

impl LockId {
    pub fn from_target(target: &LockTarget) -> Self {
        Self {
            connection: target.connection_id.clone(),
            segments: target.dn.segments_root_first(),
        }
    }

    /// Two identifiers conflict when they are on the same connection and
    /// one is a (possibly equal) segment prefix of the other.
    pub fn conflicts_with(&self, other: &LockId) -> bool {
        if self.connection != other.connection {
            return false;
        }
        let common = self.segments.len().min(other.segments.len());
        self.segments[..common] == other.segments[..common]
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.connection, self.segments.join("/"))
    }
}

/// Map resource targets to canonical identifiers.
pub fn lock_identifiers(targets: &[LockTarget]) -> Vec<LockId> {
    targets.iter().map(LockId::from_target).collect()
}

/// Whether any pair across the two identifier sets conflicts.
pub fn conflicts(a: &[LockId], b: &[LockId]) -> bool {
    a.iter().any(|x| b.iter().any(|y| x.conflicts_with(y)))
}
