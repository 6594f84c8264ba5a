//! Path-keyed entry cache.
//!
//! The cache is the single owner of all mirrored entries of one connection.
//! Entries are keyed by normalized DN, so lookup is O(1)-amortized and the
//! parent/child back-references of the original object graph reduce to path
//! arithmetic plus the per-entry child set.
//!
//! Writes are effectively serialized per subtree by the task scheduler;
//! concurrent reads elsewhere in the tree go through the sharded map
//! without coordination.

use crate::entry::Entry;
use async_trait::async_trait;
use dashmap::DashMap;
use dirmirror_core::dn::Dn;
use dirmirror_core::monitor::ProgressMonitor;
use tracing::debug;

/// Answers "does this entry exist on the server", used while materializing
/// root-level naming contexts. Implemented by the search engine; injected so
/// the cache stays transport-agnostic.
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    async fn exists(&self, dn: &Dn, monitor: &ProgressMonitor) -> bool;
}

/// Path-keyed store of mirrored directory entries.
pub struct EntryCache {
    connection_id: String,
    entries: DashMap<String, Entry>,
}

impl EntryCache {
    /// Create a cache holding only the synthetic root entry.
    pub fn new(connection_id: impl Into<String>) -> Self {
        let cache = Self {
            connection_id: connection_id.into(),
            entries: DashMap::new(),
        };
        cache.entries.insert(String::new(), Entry::new(Dn::root()));
        cache
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn contains(&self, dn: &Dn) -> bool {
        self.entries.contains_key(&dn.normalized())
    }

    /// Snapshot of one entry.
    pub fn get(&self, dn: &Dn) -> Option<Entry> {
        self.entries.get(&dn.normalized()).map(|e| e.value().clone())
    }

    /// Read access to one entry. The closure must not touch the cache.
    pub fn with_entry<R>(&self, dn: &Dn, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        self.entries.get(&dn.normalized()).map(|e| f(&e))
    }

    /// In-place mutation of one entry. The closure must not touch the cache.
    pub fn with_entry_mut<R>(&self, dn: &Dn, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        self.entries.get_mut(&dn.normalized()).map(|mut e| f(&mut e))
    }

    /// Insert an entry and link it into its parent's child set (nearest
    /// cached ancestor for base entries: the root).
    pub fn attach(&self, entry: Entry) {
        let dn = entry.dn.clone();
        let parent = if entry.is_base_entry {
            Some(Dn::root())
        } else {
            dn.parent()
        };
        self.entries.insert(dn.normalized(), entry);
        if let Some(parent) = parent {
            self.with_entry_mut(&parent, |p| {
                p.add_child(&dn);
            });
        }
    }

    /// Number of cached entries, the synthetic root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// DNs of the cached children of `dn`.
    pub fn children_of(&self, dn: &Dn) -> Vec<Dn> {
        let keys: Vec<String> = match self.entries.get(&dn.normalized()) {
            Some(entry) => entry.children.iter().cloned().collect(),
            None => return Vec::new(),
        };
        keys.iter()
            .filter_map(|key| self.entries.get(key).map(|e| e.dn.clone()))
            .collect()
    }

    /// All cached DNs at or below `dn`.
    pub fn subtree_of(&self, dn: &Dn) -> Vec<Dn> {
        self.entries
            .iter()
            .filter(|e| e.dn.is_within(dn))
            .map(|e| e.dn.clone())
            .collect()
    }

    /// Walk from the nearest cached ancestor down to `dn`, creating
    /// placeholder entries. Root-level naming contexts (any ancestor whose
    /// parent is the root or itself uncached) are probed for existence
    /// first, so a sparse-root server never grows a phantom context entry.
    ///
    /// Returns whether `dn` ended up cached.
    pub async fn materialize(
        &self,
        dn: &Dn,
        probe: &dyn ExistenceProbe,
        monitor: &ProgressMonitor,
    ) -> bool {
        // collect the uncached chain, leaf-first
        let mut chain = Vec::new();
        let mut current = dn.clone();
        while !self.contains(&current) {
            chain.push(current.clone());
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        // create top-down
        for target in chain.into_iter().rev() {
            let parent = target.parent();
            match parent {
                Some(parent) if !parent.is_root() && self.contains(&parent) => {
                    debug!(dn = %target, "materializing placeholder entry");
                    self.entries
                        .insert(target.normalized(), Entry::new(target.clone()));
                    self.with_entry_mut(&parent, |p| {
                        p.add_child(&target);
                        // the child set is now known to be partial
                        p.children_initialized = true;
                        p.has_more_children = true;
                        p.has_children_hint = true;
                    });
                }
                _ => {
                    // naming-context candidate: check it really exists before
                    // caching it
                    if monitor.is_canceled() {
                        break;
                    }
                    if probe.exists(&target, monitor).await {
                        debug!(dn = %target, "materializing naming context");
                        self.attach(Entry::new_base(target));
                    }
                }
            }
        }

        self.contains(dn)
    }

    /// Drop `dn` and every cached descendant, unlinking from the parent's
    /// child set. Idempotent; invalidating the root resets the cache to its
    /// initial state.
    pub fn invalidate_subtree(&self, dn: &Dn) -> usize {
        if dn.is_root() {
            let removed = self.entries.len() - 1;
            self.entries.retain(|key, _| key.is_empty());
            self.with_entry_mut(&Dn::root(), Entry::clear_children);
            return removed;
        }

        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.dn.is_within(dn))
            .map(|e| e.dn.normalized())
            .collect();
        let removed = doomed.len();
        for key in doomed {
            self.entries.remove(&key);
        }

        // the entry may have been attached under the root as a base entry
        if let Some(parent) = dn.parent() {
            self.with_entry_mut(&parent, |p| p.remove_child(dn));
        }
        self.with_entry_mut(&Dn::root(), |root| root.remove_child(dn));

        if removed > 0 {
            debug!(dn = %dn, removed, "invalidated subtree");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe that approves a fixed set of DNs and counts calls.
    struct SetProbe {
        existing: Vec<Dn>,
        calls: AtomicUsize,
    }

    impl SetProbe {
        fn new(existing: &[&str]) -> Self {
            Self {
                existing: existing.iter().map(|s| Dn::parse(s).unwrap()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExistenceProbe for SetProbe {
        async fn exists(&self, dn: &Dn, _monitor: &ProgressMonitor) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.existing.iter().any(|e| e == dn)
        }
    }

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn test_root_always_cached() {
        let cache = EntryCache::new("conn");
        assert!(cache.contains(&Dn::root()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_materialize_probes_naming_context() {
        let cache = EntryCache::new("conn");
        let probe = SetProbe::new(&["dc=example,dc=com", "ou=users,dc=example,dc=com"]);
        let monitor = ProgressMonitor::new();

        let target = dn("cn=alice,ou=users,dc=example,dc=com");
        assert!(cache.materialize(&target, &probe, &monitor).await);

        // "dc=com" alone does not exist on a sparse-root server and must
        // not be cached; "dc=example,dc=com" hangs off the root instead
        assert!(!cache.contains(&dn("dc=com")));
        let base = cache.get(&dn("dc=example,dc=com")).unwrap();
        assert!(base.is_base_entry);
        assert!(cache.with_entry(&Dn::root(), |root| root.has_child(&base.dn)).unwrap());

        // intermediate and leaf placeholders exist
        assert!(cache.contains(&dn("ou=users,dc=example,dc=com")));
        assert!(cache.contains(&target));
    }

    #[tokio::test]
    async fn test_materialize_nonexistent_base_not_cached() {
        let cache = EntryCache::new("conn");
        let probe = SetProbe::new(&[]);
        let monitor = ProgressMonitor::new();

        assert!(!cache.materialize(&dn("dc=ghost"), &probe, &monitor).await);
        assert!(!cache.contains(&dn("dc=ghost")));
    }

    #[tokio::test]
    async fn test_materialize_under_cached_parent_skips_probe() {
        let cache = EntryCache::new("conn");
        cache.attach(Entry::new_base(dn("dc=example")));
        let probe = SetProbe::new(&[]);
        let monitor = ProgressMonitor::new();

        assert!(
            cache
                .materialize(&dn("cn=alice,dc=example"), &probe, &monitor)
                .await
        );
        // parent was cached: placeholder creation, no existence probe
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        let parent = cache.get(&dn("dc=example")).unwrap();
        assert!(parent.has_child(&dn("cn=alice,dc=example")));
        assert!(parent.children_initialized);
        assert!(parent.has_more_children);
    }

    #[tokio::test]
    async fn test_invalidate_subtree() {
        let cache = EntryCache::new("conn");
        cache.attach(Entry::new_base(dn("dc=example")));
        let probe = SetProbe::new(&[]);
        let monitor = ProgressMonitor::new();
        cache
            .materialize(&dn("cn=a,ou=team,dc=example"), &probe, &monitor)
            .await;
        cache
            .materialize(&dn("cn=b,ou=team,dc=example"), &probe, &monitor)
            .await;

        let removed = cache.invalidate_subtree(&dn("ou=team,dc=example"));
        assert_eq!(removed, 3);
        assert!(!cache.contains(&dn("ou=team,dc=example")));
        assert!(!cache.contains(&dn("cn=a,ou=team,dc=example")));
        assert!(cache.contains(&dn("dc=example")));
        assert!(
            !cache
                .get(&dn("dc=example"))
                .unwrap()
                .has_child(&dn("ou=team,dc=example"))
        );

        // idempotent
        assert_eq!(cache.invalidate_subtree(&dn("ou=team,dc=example")), 0);
    }

    #[tokio::test]
    async fn test_children_of() {
        let cache = EntryCache::new("conn");
        cache.attach(Entry::new_base(dn("dc=example")));
        cache.attach(Entry::new(dn("ou=a,dc=example")));
        cache.attach(Entry::new(dn("ou=b,dc=example")));

        let mut children: Vec<String> = cache
            .children_of(&dn("dc=example"))
            .iter()
            .map(|d| d.to_string())
            .collect();
        children.sort();
        assert_eq!(children, vec!["ou=a,dc=example", "ou=b,dc=example"]);
    }
}
