//! Children enumeration.
//!
//! Fills an entry's child list by one-level search, optionally paged. In
//! scroll mode each page replaces the child list and the entry carries the
//! cookie for the next page; otherwise paging continues transparently
//! inside the search engine. Subentries and aliases/referrals are fetched
//! by follow-up searches when requested, since servers exclude them from
//! plain one-level results.

use crate::search::{Search, SearchEngine, SearchParameters};
use dirmirror_core::config::MirrorConfig;
use dirmirror_core::controls::{Control, PagedResults};
use dirmirror_core::dn::Dn;
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_core::schema::OBJECT_CLASS_AT;
use dirmirror_core::transport::{FILTER_SUBENTRY, FILTER_TRUE, ReferralHandling, Scope};
use dirmirror_tree::cache::EntryCache;
use dirmirror_tree::entry::{ChildrenPaging, Entry};
use std::sync::Arc;
use tracing::debug;

const FILTER_ALIAS_OR_REFERRAL: &str = "(|(objectClass=alias)(objectClass=referral))";

/// What to fetch when enumerating children.
#[derive(Debug, Clone)]
pub struct ChildrenOptions {
    /// Paged enumeration; `None` disables the paged-results control.
    pub paging: Option<PagedResults>,
    pub fetch_subentries: bool,
    pub fetch_aliases_and_referrals: bool,
}

impl ChildrenOptions {
    pub fn from_config(config: &MirrorConfig) -> Self {
        let paging = if config.paging.scroll_mode {
            PagedResults::scroll(config.paging.page_size)
        } else {
            PagedResults::new(config.paging.page_size)
        };
        Self {
            paging: Some(paging),
            fetch_subentries: false,
            fetch_aliases_and_referrals: false,
        }
    }

    pub fn unpaged() -> Self {
        Self {
            paging: None,
            fetch_subentries: false,
            fetch_aliases_and_referrals: false,
        }
    }
}

/// Enumerates children of cached entries.
pub struct ChildrenEngine {
    engine: Arc<SearchEngine>,
    cache: Arc<EntryCache>,
}

impl ChildrenEngine {
    pub fn new(engine: Arc<SearchEngine>, cache: Arc<EntryCache>) -> Self {
        Self { engine, cache }
    }

    pub fn connection_id(&self) -> &str {
        self.cache.connection_id()
    }

    /// Enumerate the children of `parent` from the first page.
    pub async fn initialize_children(
        &self,
        parent: &Dn,
        options: &ChildrenOptions,
        monitor: &ProgressMonitor,
    ) {
        self.run(parent, options, None, monitor).await;
    }

    /// Fetch the next page of a scroll-mode enumeration; the page replaces
    /// the current child list. A parent without paging state falls back to
    /// the first page.
    pub async fn next_children_page(
        &self,
        parent: &Dn,
        options: &ChildrenOptions,
        monitor: &ProgressMonitor,
    ) {
        let cookie = self
            .cache
            .with_entry(parent, |e| e.children_paging.clone())
            .flatten()
            .map(|paging| paging.next_cookie);
        self.run(parent, options, cookie, monitor).await;
    }

    async fn run(
        &self,
        parent: &Dn,
        options: &ChildrenOptions,
        cookie: Option<Vec<u8>>,
        monitor: &ProgressMonitor,
    ) {
        if monitor.is_canceled() {
            return;
        }

        // old children may be stale in any way; drop them entirely
        for child in self.cache.children_of(parent) {
            self.cache.invalidate_subtree(&child);
        }
        self.cache.with_entry_mut(parent, Entry::clear_children);

        let mut params = SearchParameters::new(parent.clone(), Scope::OneLevel, FILTER_TRUE);
        params.attributes = vec![OBJECT_CLASS_AT.to_string()];
        params.init_children_hint = true;
        params.referral_handling = ReferralHandling::Manual;
        if let Some(paging) = &options.paging {
            params
                .controls
                .push(paging.clone().with_cookie(cookie).into());
        }

        let search = Search::new(format!("children of {parent}"), params);
        self.engine.execute(&search, monitor).await;

        let hits = search.hits();
        let continuations = search.continuations();
        let mut limit_exceeded = search.count_limit_exceeded();

        if hits.is_empty() && continuations.is_empty() {
            self.cache
                .with_entry_mut(parent, |p| p.has_children_hint = false);
        } else {
            for hit in hits.iter() {
                self.cache.with_entry_mut(parent, |p| {
                    p.add_child(&hit.dn);
                });
            }
            for continuation in continuations {
                // unresolved redirects show up as placeholder children
                if let Some(dn) = dn_from_url(&continuation.url) {
                    debug!(parent = %parent, url = %continuation.url, "adding continuation child");
                    self.cache
                        .attach(Entry::new_continuation(dn.clone(), continuation.url));
                    self.cache.with_entry_mut(parent, |p| {
                        p.add_child(&dn);
                    });
                }
            }
        }

        // scroll mode: remember the cookie for the next page
        let paging_state = search.next_page_parameters().and_then(|next| {
            next.paged_results().map(|paged| ChildrenPaging {
                page_size: paged.size,
                next_cookie: paged.cookie.clone().unwrap_or_default(),
            })
        });
        self.cache
            .with_entry_mut(parent, |p| p.children_paging = paging_state.clone());

        if options.fetch_subentries && !monitor.is_canceled() {
            limit_exceeded |= self
                .follow_up(parent, FILTER_SUBENTRY, true, monitor)
                .await;
        }
        if options.fetch_aliases_and_referrals && !monitor.is_canceled() {
            limit_exceeded |= self
                .follow_up(parent, FILTER_ALIAS_OR_REFERRAL, false, monitor)
                .await;
        }

        self.cache.with_entry_mut(parent, |p| {
            p.has_more_children = limit_exceeded || monitor.is_canceled();
            p.children_initialized = true;
        });
        debug!(parent = %parent, "children initialized");
    }

    /// One-level follow-up search attaching extra children; returns the
    /// count-limit flag.
    async fn follow_up(
        &self,
        parent: &Dn,
        filter: &str,
        subentries: bool,
        monitor: &ProgressMonitor,
    ) -> bool {
        let mut params = SearchParameters::new(parent.clone(), Scope::OneLevel, filter);
        params.attributes = vec![OBJECT_CLASS_AT.to_string()];
        params.init_children_hint = true;
        if subentries {
            params.controls.push(Control::subentries().into());
        }

        let search = Search::new(format!("children of {parent} ({filter})"), params);
        self.engine.execute(&search, monitor).await;

        for hit in search.hits().iter() {
            self.cache.with_entry_mut(parent, |p| {
                p.add_child(&hit.dn);
            });
        }
        search.count_limit_exceeded()
    }
}

/// Extract the DN part of an LDAP URL (`ldap://host:port/dn`).
fn dn_from_url(url: &str) -> Option<Dn> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let (_, dn) = rest.split_once('/')?;
    Dn::parse(dn).ok().filter(|dn| !dn.is_root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dn_from_url() {
        let dn = dn_from_url("ldap://other.example.com:10389/ou=remote,dc=example").unwrap();
        assert_eq!(dn.to_string(), "ou=remote,dc=example");

        assert!(dn_from_url("ldap://host-only").is_none());
        assert!(dn_from_url("not a url").is_none());
        assert!(dn_from_url("ldap://host/").is_none());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = MirrorConfig::default();
        config.paging.page_size = 42;
        let options = ChildrenOptions::from_config(&config);
        let paging = options.paging.unwrap();
        assert_eq!(paging.size, 42);
        assert!(!paging.scroll_mode);

        config.paging.scroll_mode = true;
        let options = ChildrenOptions::from_config(&config);
        assert!(options.paging.unwrap().scroll_mode);
    }
}
