//! Registry of open searches.
//!
//! Delete and rename must scrub affected paths from every open search's hit
//! list so stale results never point at entries that no longer exist. The
//! registry holds weak references: dropping a search elsewhere is enough to
//! retire it.

use crate::search::Search;
use dirmirror_core::dn::Dn;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
pub struct SearchRegistry {
    searches: Mutex<Vec<Weak<Search>>>,
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, search: &Arc<Search>) {
        let mut searches = self.searches.lock();
        searches.retain(|weak| weak.strong_count() > 0);
        searches.push(Arc::downgrade(search));
    }

    /// Number of live registered searches.
    pub fn len(&self) -> usize {
        self.searches
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove hits at or below `dn` from all open searches.
    pub fn remove_subtree(&self, dn: &Dn) {
        let live: Vec<Arc<Search>> = {
            let mut searches = self.searches.lock();
            searches.retain(|weak| weak.strong_count() > 0);
            searches.iter().filter_map(Weak::upgrade).collect()
        };
        for search in live {
            let dropped = search.remove_hits_within(dn);
            if dropped > 0 {
                debug!(search = %search.name(), dn = %dn, dropped, "scrubbed search results");
            }
        }
    }
}
