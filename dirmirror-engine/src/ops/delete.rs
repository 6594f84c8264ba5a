//! Recursive entry deletion.
//!
//! Servers require entries to be empty before deletion, so children go
//! first, post-order, re-enumerated in bounded batches until none remain.
//! Referral entries need the manage-referral control; an entry whose
//! referral status is unknown is resolved with an object-scope lookup
//! before its delete.

use crate::registry::SearchRegistry;
use dirmirror_core::controls::Control;
use dirmirror_core::dn::Dn;
use dirmirror_core::error::ErrorKind;
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_core::schema::{OBJECT_CLASS_AT, REFERRAL_OC};
use dirmirror_core::transport::{
    DirectoryTransport, FILTER_TRUE, ReferralHandling, Scope, SearchItem, SearchRequest,
};
use dirmirror_tree::cache::EntryCache;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// Deletes entries and subtrees.
pub struct DeleteEngine {
    transport: Arc<dyn DirectoryTransport>,
    cache: Arc<EntryCache>,
    registry: Arc<SearchRegistry>,
    batch_size: u32,
    continue_on_error: bool,
}

impl DeleteEngine {
    pub fn new(
        transport: Arc<dyn DirectoryTransport>,
        cache: Arc<EntryCache>,
        registry: Arc<SearchRegistry>,
        batch_size: u32,
        continue_on_error: bool,
    ) -> Self {
        Self {
            transport,
            cache,
            registry,
            batch_size,
            continue_on_error,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.transport.connection_id()
    }

    /// Delete each entry with its whole subtree. Returns the number of
    /// entries deleted on the server.
    ///
    /// Per entry: on success the cached subtree is dropped, the parent's
    /// child knowledge is invalidated and open searches are scrubbed; on a
    /// branch failure the errors surface and remaining entries are only
    /// attempted when continue-on-error is set.
    pub async fn delete_entries(&self, dns: &[Dn], monitor: &ProgressMonitor) -> u32 {
        let mut deleted = 0;
        for dn in dns {
            if monitor.is_canceled() {
                break;
            }

            let known_referral = self
                .cache
                .with_entry(dn, |e| e.attributes_initialized.then_some(e.is_referral))
                .flatten();

            let branch_monitor = monitor.fork();
            deleted += self
                .delete_recursive(dn.clone(), known_referral, &branch_monitor)
                .await;

            if branch_monitor.errors_reported() {
                branch_monitor.surface_to(monitor);
                if !self.continue_on_error {
                    break;
                }
                continue;
            }

            self.cache.invalidate_subtree(dn);
            if let Some(parent) = dn.parent() {
                self.cache.with_entry_mut(&parent, |p| {
                    p.children_initialized = false;
                });
            }
            self.registry.remove_subtree(dn);
        }
        deleted
    }

    fn delete_recursive<'a>(
        &'a self,
        dn: Dn,
        known_referral: Option<bool>,
        monitor: &'a ProgressMonitor,
    ) -> BoxFuture<'a, u32> {
        async move {
            let mut deleted = 0;

            // children first, re-enumerated until the entry is empty
            loop {
                if monitor.is_canceled() || monitor.errors_reported() {
                    return deleted;
                }

                let mut request = SearchRequest::new(dn.clone(), Scope::OneLevel, FILTER_TRUE);
                request.attributes = vec![OBJECT_CLASS_AT.to_string()];
                request.size_limit = self.batch_size;
                request.referral_handling = ReferralHandling::Ignore;

                let response = match self.transport.search(&request, monitor).await {
                    Ok(response) => response,
                    Err(error) if error.kind == ErrorKind::NoSuchObject => break,
                    Err(error) if error.kind.is_limit() => {
                        // nothing enumerable this pass; the self-delete below
                        // will surface a non-empty error if children remain
                        break;
                    }
                    Err(error) => {
                        monitor.report_directory_error(error);
                        return deleted;
                    }
                };

                let children: Vec<(Dn, Option<bool>)> = response
                    .items
                    .iter()
                    .filter_map(|item| match item {
                        SearchItem::Object { dn, attributes } => {
                            let referral = attributes
                                .get(OBJECT_CLASS_AT)
                                .map(|oc| oc.contains_text(REFERRAL_OC));
                            Some((dn.clone(), referral))
                        }
                        SearchItem::Continuation { .. } => None,
                    })
                    .collect();
                if children.is_empty() {
                    break;
                }

                let before = deleted;
                for (child, referral) in children {
                    if monitor.is_canceled() {
                        return deleted;
                    }
                    deleted += self.delete_recursive(child, referral, monitor).await;
                    if monitor.errors_reported() {
                        // stop recursing into this branch
                        return deleted;
                    }
                }
                if deleted == before {
                    // no progress over a full batch; bail out instead of
                    // re-enumerating the same children forever
                    return deleted;
                }
            }

            if monitor.is_canceled() || monitor.errors_reported() {
                return deleted;
            }

            let is_referral = match known_referral {
                Some(known) => known,
                None => self.lookup_referral_status(&dn, monitor).await,
            };
            let controls = if is_referral {
                vec![Control::manage_dsa_it()]
            } else {
                Vec::new()
            };

            match self.transport.delete_entry(&dn, &controls, monitor).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(dn = %dn, deleted, "deleted entry");
                }
                Err(error) => monitor.report_directory_error(error),
            }
            deleted
        }
        .boxed()
    }

    /// Object-scope lookup with referral handling disabled; referral
    /// deletion needs the manage-referral control.
    async fn lookup_referral_status(&self, dn: &Dn, monitor: &ProgressMonitor) -> bool {
        let mut request = SearchRequest::new(dn.clone(), Scope::Object, FILTER_TRUE);
        request.attributes = vec![OBJECT_CLASS_AT.to_string()];
        request.size_limit = 1;
        request.referral_handling = ReferralHandling::Ignore;

        let lookup_monitor = monitor.fork();
        match self.transport.search(&request, &lookup_monitor).await {
            Ok(response) => response.items.iter().any(|item| match item {
                SearchItem::Object { attributes, .. } => attributes
                    .get(OBJECT_CLASS_AT)
                    .is_some_and(|oc| oc.contains_text(REFERRAL_OC)),
                SearchItem::Continuation { .. } => false,
            }),
            Err(_) => false,
        }
    }
}
