//! Entry rename, with simulated fallback for non-leaf entries.
//!
//! The fast path is a single server-side rename. Servers that refuse to
//! rename a non-empty entry answer with a non-leaf error; with a fallback
//! policy enabled the rename is then simulated as a subtree copy followed
//! by a delete of the original — and the original is never deleted unless
//! the copy phase finished without a single error.

use crate::ops::copy::CopyEngine;
use crate::ops::delete::DeleteEngine;
use crate::registry::SearchRegistry;
use crate::search::{Search, SearchEngine, SearchParameters};
use dirmirror_core::controls::Control;
use dirmirror_core::dn::{Dn, Rdn};
use dirmirror_core::error::ErrorKind;
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_core::transport::{DirectoryTransport, FILTER_TRUE, Scope};
use dirmirror_tree::cache::EntryCache;
use std::sync::Arc;
use tracing::debug;

/// Renames entries.
pub struct RenameEngine {
    transport: Arc<dyn DirectoryTransport>,
    cache: Arc<EntryCache>,
    registry: Arc<SearchRegistry>,
    search_engine: Arc<SearchEngine>,
    copy: Arc<CopyEngine>,
    delete: Arc<DeleteEngine>,
}

impl RenameEngine {
    pub fn new(
        transport: Arc<dyn DirectoryTransport>,
        cache: Arc<EntryCache>,
        registry: Arc<SearchRegistry>,
        search_engine: Arc<SearchEngine>,
        copy: Arc<CopyEngine>,
        delete: Arc<DeleteEngine>,
    ) -> Self {
        Self {
            transport,
            cache,
            registry,
            search_engine,
            copy,
            delete,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.transport.connection_id()
    }

    /// Rename `dn` to `new_rdn` under the same parent. Returns the new DN
    /// on success.
    ///
    /// `simulate_on_non_leaf` enables the copy-then-delete fallback when
    /// the server refuses to rename a non-empty entry.
    pub async fn rename(
        &self,
        dn: &Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
        simulate_on_non_leaf: bool,
        monitor: &ProgressMonitor,
    ) -> Option<Dn> {
        let Some(parent) = dn.parent() else {
            monitor.report_error("cannot rename the root entry", None);
            return None;
        };
        let new_dn = parent.child(new_rdn.clone());

        let is_referral = self
            .cache
            .with_entry(dn, |e| e.is_referral)
            .unwrap_or(false);
        let controls = if is_referral {
            vec![Control::manage_dsa_it()]
        } else {
            Vec::new()
        };

        let fast_monitor = monitor.fork();
        match self
            .transport
            .rename_entry(dn, &new_rdn, delete_old_rdn, &controls, &fast_monitor)
            .await
        {
            Ok(()) => {}
            Err(error) if error.kind == ErrorKind::NotAllowedOnNonLeaf && simulate_on_non_leaf => {
                debug!(dn = %dn, new_dn = %new_dn, "simulating rename of non-leaf entry");

                let copy_monitor = monitor.fork();
                let copied = self
                    .copy
                    .copy_entry(
                        dn,
                        &parent,
                        Some(new_rdn.clone()),
                        Scope::Subtree,
                        None,
                        &copy_monitor,
                    )
                    .await;
                if copy_monitor.errors_reported() || copy_monitor.is_canceled() {
                    // never delete the original after an incomplete copy
                    copy_monitor.surface_to(monitor);
                    return None;
                }
                debug!(copied, "simulated rename: copy phase complete");

                let delete_monitor = monitor.fork();
                self.delete
                    .delete_entries(std::slice::from_ref(dn), &delete_monitor)
                    .await;
                if delete_monitor.errors_reported() {
                    delete_monitor.surface_to(monitor);
                    return None;
                }
            }
            Err(error) => {
                monitor.report_directory_error(error);
                return None;
            }
        }

        // the old path and everything below it is gone
        self.cache.invalidate_subtree(dn);
        self.cache.with_entry_mut(&parent, |p| {
            p.children_initialized = false;
            p.has_children_hint = true;
        });
        self.registry.remove_subtree(dn);

        // best-effort re-resolve of the renamed entry; unresolved referral
        // targets are tolerated and never fail the rename
        let resolve_monitor = monitor.fork();
        let mut params = SearchParameters::new(new_dn.clone(), Scope::Object, FILTER_TRUE);
        params.init_children_hint = true;
        let resolve = Search::new(format!("resolve {new_dn}"), params);
        self.search_engine.execute(&resolve, &resolve_monitor).await;

        debug!(old = %dn, new = %new_dn, "renamed entry");
        Some(new_dn)
    }
}
