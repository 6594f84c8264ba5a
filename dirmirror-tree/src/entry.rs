//! The mirrored entry model.

use chrono::{DateTime, Utc};
use dirmirror_core::dn::{Dn, Rdn};
use dirmirror_core::transport::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Paging state for scroll-mode children enumeration: enough to build the
/// next-page follow-up search without holding a search object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenPaging {
    pub page_size: u32,
    pub next_cookie: Vec<u8>,
}

/// A local mirror of one remote directory object.
///
/// Entries are owned exclusively by the entry cache and mutated in place.
/// The tree shape lives in `children` (normalized child DNs) plus the
/// entry's own path; the parent back-reference is simply `dn.parent()`.
/// Naming-context roots hang off the tree root regardless of their depth,
/// which is why children are tracked by full path rather than by RDN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Full path of this entry.
    pub dn: Dn,

    /// Last fetched attribute snapshot.
    pub attributes: Attributes,

    /// Whether the server hinted that children may exist. Optimistically
    /// true until a hint or enumeration says otherwise.
    pub has_children_hint: bool,

    /// Set from the alias object class.
    pub is_alias: bool,

    /// Set from the referral object class.
    pub is_referral: bool,

    /// Set when the entry was retrieved as a subentry.
    pub is_subentry: bool,

    /// Whether `attributes` reflects a completed attribute fetch.
    pub attributes_initialized: bool,

    /// Whether `children` reflects the last successful enumeration.
    pub children_initialized: bool,

    /// Whether the last enumeration stopped early (limit or cancellation).
    pub has_more_children: bool,

    /// True for naming-context roots attached directly under the tree root.
    pub is_base_entry: bool,

    /// Unresolved referral target URL, for continued-search placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved_url: Option<String>,

    /// Scroll-mode paging state of the children enumeration, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children_paging: Option<ChildrenPaging>,

    /// Normalized DNs of cached children.
    pub children: BTreeSet<String>,

    /// Creation timestamp (local, cache lifetime).
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp (local, cache lifetime).
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Create a placeholder entry: known to exist on the path to something
    /// real, attributes not yet fetched.
    pub fn new(dn: Dn) -> Self {
        let now = Utc::now();
        Self {
            dn,
            attributes: Attributes::new(),
            has_children_hint: true,
            is_alias: false,
            is_referral: false,
            is_subentry: false,
            attributes_initialized: false,
            children_initialized: false,
            has_more_children: false,
            is_base_entry: false,
            unresolved_url: None,
            children_paging: None,
            children: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a naming-context root entry.
    pub fn new_base(dn: Dn) -> Self {
        Self {
            is_base_entry: true,
            ..Self::new(dn)
        }
    }

    /// Create an unresolved continued-search placeholder.
    pub fn new_continuation(dn: Dn, url: impl Into<String>) -> Self {
        Self {
            unresolved_url: Some(url.into()),
            has_children_hint: false,
            ..Self::new(dn)
        }
    }

    pub fn rdn(&self) -> Option<&Rdn> {
        self.dn.rdn()
    }

    pub fn is_root(&self) -> bool {
        self.dn.is_root()
    }

    pub fn is_unresolved(&self) -> bool {
        self.unresolved_url.is_some()
    }

    /// Replace the attribute snapshot and mark attributes initialized.
    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
        self.attributes_initialized = true;
        self.touch();
    }

    /// Record a child. Returns true if it was not present before.
    pub fn add_child(&mut self, child: &Dn) -> bool {
        let added = self.children.insert(child.normalized());
        if added {
            self.has_children_hint = true;
            self.touch();
        }
        added
    }

    /// Forget a child.
    pub fn remove_child(&mut self, child: &Dn) -> bool {
        let removed = self.children.remove(&child.normalized());
        if removed {
            self.touch();
        }
        removed
    }

    pub fn has_child(&self, child: &Dn) -> bool {
        self.children.contains(&child.normalized())
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Drop all cached children and the children-initialized state; any
    /// operation that may have invalidated the child set calls this.
    pub fn clear_children(&mut self) {
        self.children.clear();
        self.children_initialized = false;
        self.has_more_children = false;
        self.children_paging = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_defaults() {
        let entry = Entry::new(Dn::parse("cn=alice,ou=users").unwrap());
        assert!(entry.has_children_hint);
        assert!(!entry.attributes_initialized);
        assert!(!entry.children_initialized);
        assert!(!entry.is_base_entry);
        assert_eq!(entry.rdn().unwrap().value(), "alice");
    }

    #[test]
    fn test_child_tracking_is_case_insensitive() {
        let mut entry = Entry::new(Dn::parse("ou=users").unwrap());
        let child = Dn::parse("cn=Alice,ou=users").unwrap();
        let same = Dn::parse("CN=alice,OU=Users").unwrap();
        assert!(entry.add_child(&child));
        assert!(!entry.add_child(&same));
        assert!(entry.has_child(&same));
        assert!(entry.remove_child(&same));
        assert_eq!(entry.child_count(), 0);
    }

    #[test]
    fn test_clear_children_resets_enumeration_state() {
        let mut entry = Entry::new(Dn::parse("ou=users").unwrap());
        entry.add_child(&Dn::parse("cn=alice,ou=users").unwrap());
        entry.children_initialized = true;
        entry.has_more_children = true;
        entry.children_paging = Some(ChildrenPaging {
            page_size: 10,
            next_cookie: vec![1],
        });

        entry.clear_children();
        assert_eq!(entry.child_count(), 0);
        assert!(!entry.children_initialized);
        assert!(!entry.has_more_children);
        assert!(entry.children_paging.is_none());
    }

    #[test]
    fn test_continuation_entry() {
        let entry = Entry::new_continuation(
            Dn::parse("ou=remote").unwrap(),
            "ldap://other.example.com/ou=remote",
        );
        assert!(entry.is_unresolved());
        assert!(!entry.has_children_hint);
    }
}
