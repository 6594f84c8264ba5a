//! Recursive entry copy.
//!
//! A copy re-reads the source from the server, rewrites the naming
//! attribute values for the destination, creates the target entry, and
//! (for one-level/subtree scope) recurses over the source's children. The
//! source subtree is never mutated.
//!
//! Entry-exists conflicts suspend the engine on a typed conflict value; a
//! caller-supplied [`ConflictResolver`] decides how to proceed, which keeps
//! any interactive prompting outside the engine.

use async_trait::async_trait;
use dirmirror_core::controls::Control;
use dirmirror_core::dn::{Dn, Rdn};
use dirmirror_core::error::ErrorKind;
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_core::schema::{OBJECT_CLASS_AT, REF_AT, REFERRAL_OC};
use dirmirror_core::transport::{
    ALL_USER_ATTRIBUTES, Attributes, DirectoryTransport, FILTER_TRUE, Modification, Scope,
    SearchItem, SearchRequest,
};
use dirmirror_tree::cache::EntryCache;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// An entry-exists conflict hit while copying.
#[derive(Debug, Clone)]
pub struct CopyConflict {
    /// Destination that already exists.
    pub existing_dn: Dn,
    /// RDN the source entry originally carried.
    pub original_rdn: Rdn,
    /// How many times this entry has collided so far (1 on the first
    /// conflict).
    pub attempt: u32,
}

/// What to do about a [`CopyConflict`].
#[derive(Debug, Clone)]
pub enum ConflictDecision {
    /// Cancel the whole copy operation.
    Abort,
    /// Leave the existing entry alone and skip this source entry.
    Skip,
    /// Replace the existing entry's attributes with the source's.
    Overwrite,
    /// Retry the create under another RDN.
    Rename(Rdn),
}

/// Resolves entry-exists conflicts; may consult anything from a fixed
/// policy to an interactive caller.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, conflict: &CopyConflict) -> ConflictDecision;
}

/// Built-in conflict policies.
#[derive(Debug, Clone)]
pub enum ConflictPolicy {
    Abort,
    Skip,
    Overwrite,
    /// Retry as "Copy of X", "Copy 2 of X", … up to `limit` attempts.
    AlternateName { limit: u32 },
}

#[async_trait]
impl ConflictResolver for ConflictPolicy {
    async fn resolve(&self, conflict: &CopyConflict) -> ConflictDecision {
        match self {
            Self::Abort => ConflictDecision::Abort,
            Self::Skip => ConflictDecision::Skip,
            Self::Overwrite => ConflictDecision::Overwrite,
            Self::AlternateName { limit } => {
                if conflict.attempt > *limit {
                    ConflictDecision::Abort
                } else {
                    ConflictDecision::Rename(alternate_rdn(
                        &conflict.original_rdn,
                        conflict.attempt,
                    ))
                }
            }
        }
    }
}

/// The alternate name for the n-th collision: "Copy of X", then
/// "Copy 2 of X", "Copy 3 of X", …
pub fn alternate_rdn(original: &Rdn, attempt: u32) -> Rdn {
    let ava = &original.avas()[0];
    let value = if attempt <= 1 {
        format!("Copy of {}", ava.value())
    } else {
        format!("Copy {} of {}", attempt, ava.value())
    };
    Rdn::new(ava.attr_type(), value)
}

/// Rewrite an attribute snapshot for a new RDN: the old naming values are
/// removed (an attribute emptied entirely is dropped), the new ones added
/// without duplication.
pub fn apply_new_rdn(attributes: &mut Attributes, old_rdn: &Rdn, new_rdn: &Rdn) {
    for ava in old_rdn.avas() {
        attributes.remove_value(ava.attr_type(), ava.value());
    }
    for ava in new_rdn.avas() {
        attributes.add_value(ava.attr_type(), ava.value());
    }
}

/// Copies entries and subtrees.
pub struct CopyEngine {
    transport: Arc<dyn DirectoryTransport>,
    cache: Arc<EntryCache>,
    continue_on_error: bool,
}

impl CopyEngine {
    pub fn new(
        transport: Arc<dyn DirectoryTransport>,
        cache: Arc<EntryCache>,
        continue_on_error: bool,
    ) -> Self {
        Self {
            transport,
            cache,
            continue_on_error,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.transport.connection_id()
    }

    /// Copy each source under `target_parent`. Returns the number of
    /// entries created.
    pub async fn copy_entries(
        &self,
        sources: &[Dn],
        target_parent: &Dn,
        scope: Scope,
        resolver: Option<&dyn ConflictResolver>,
        monitor: &ProgressMonitor,
    ) -> u32 {
        let mut copied = 0;
        for source in sources {
            if monitor.is_canceled() {
                break;
            }
            if scope != Scope::Object && target_parent.is_within(source) {
                monitor.report_error(
                    format!("cannot copy {source} into its own subtree"),
                    None,
                );
                continue;
            }
            copied += self
                .copy_entry(source, target_parent, None, scope, resolver, monitor)
                .await;
        }

        // whatever was known about the target's children is stale now
        self.cache.with_entry_mut(target_parent, |parent| {
            parent.children_initialized = false;
            parent.has_children_hint = true;
        });
        copied
    }

    /// Copy one source entry (and, per scope, its subtree) under `parent`,
    /// optionally forcing a new RDN for the top entry.
    pub async fn copy_entry(
        &self,
        source: &Dn,
        parent: &Dn,
        new_rdn: Option<Rdn>,
        scope: Scope,
        resolver: Option<&dyn ConflictResolver>,
        monitor: &ProgressMonitor,
    ) -> u32 {
        // re-read the source: all user attributes plus the referral target
        let mut request = SearchRequest::new(source.clone(), Scope::Object, FILTER_TRUE);
        request.attributes = vec![ALL_USER_ATTRIBUTES.to_string(), REF_AT.to_string()];
        request.size_limit = 1;

        let is_referral = self
            .cache
            .with_entry(source, |e| e.is_referral)
            .unwrap_or(false);
        if is_referral {
            request.controls.push(Control::manage_dsa_it().into());
        }

        let response = match self.transport.search(&request, monitor).await {
            Ok(response) => response,
            Err(error) => {
                monitor.report_directory_error(error);
                return 0;
            }
        };

        // copying onto the tree root means "next to the source"
        let parent = if parent.is_root() {
            source.parent().unwrap_or_else(Dn::root)
        } else {
            parent.clone()
        };

        self.copy_items(response.items, parent, new_rdn, scope, resolver, monitor)
            .await
    }

    fn copy_items<'a>(
        &'a self,
        items: Vec<SearchItem>,
        parent: Dn,
        force_rdn: Option<Rdn>,
        scope: Scope,
        resolver: Option<&'a dyn ConflictResolver>,
        monitor: &'a ProgressMonitor,
    ) -> BoxFuture<'a, u32> {
        async move {
            let mut copied = 0;
            for item in items {
                if monitor.is_canceled() {
                    break;
                }
                let (source_dn, mut attributes) = match item {
                    SearchItem::Object { dn, attributes } => (dn, attributes),
                    SearchItem::Continuation { .. } => continue,
                };
                let Some(old_rdn) = source_dn.rdn().cloned() else {
                    continue;
                };

                let mut rdn = force_rdn.clone().unwrap_or_else(|| old_rdn.clone());
                apply_new_rdn(&mut attributes, &old_rdn, &rdn);
                let mut new_dn = parent.child(rdn.clone());

                let created = 'create: {
                    let mut attempt = 0u32;
                    loop {
                        let controls = referral_controls(&attributes);
                        let create_monitor = monitor.fork();
                        let error = match self
                            .transport
                            .create_entry(&new_dn, &attributes, &controls, &create_monitor)
                            .await
                        {
                            Ok(()) => break 'create true,
                            Err(error) => error,
                        };

                        let resolver = match resolver {
                            Some(resolver) if error.kind == ErrorKind::AlreadyExists => resolver,
                            _ => {
                                monitor.report_directory_error(error);
                                break 'create false;
                            }
                        };

                        attempt += 1;
                        let conflict = CopyConflict {
                            existing_dn: new_dn.clone(),
                            original_rdn: old_rdn.clone(),
                            attempt,
                        };
                        match resolver.resolve(&conflict).await {
                            ConflictDecision::Abort => {
                                monitor.set_canceled(true);
                                break 'create false;
                            }
                            ConflictDecision::Skip => {
                                debug!(dn = %new_dn, "skipping existing entry");
                                break 'create false;
                            }
                            ConflictDecision::Overwrite => {
                                let modifications: Vec<Modification> = attributes
                                    .iter()
                                    .map(|attr| Modification::replace(attr.clone()))
                                    .collect();
                                match self
                                    .transport
                                    .modify_entry(&new_dn, &modifications, &[], &create_monitor)
                                    .await
                                {
                                    Ok(()) => {
                                        // force a reload of the overwritten target
                                        self.cache.with_entry_mut(&new_dn, |e| {
                                            e.attributes_initialized = false;
                                        });
                                        break 'create true;
                                    }
                                    Err(error) => {
                                        monitor.report_directory_error(error);
                                        break 'create false;
                                    }
                                }
                            }
                            ConflictDecision::Rename(renamed) => {
                                apply_new_rdn(&mut attributes, &rdn, &renamed);
                                new_dn = parent.child(renamed.clone());
                                rdn = renamed;
                                // retry the create under the new name
                            }
                        }
                    }
                };

                if !created {
                    if monitor.is_canceled()
                        || (monitor.errors_reported() && !self.continue_on_error)
                    {
                        break;
                    }
                    continue;
                }

                copied += 1;
                debug!(source = %source_dn, target = %new_dn, copied, "copied entry");

                // recurse into the source's children; one-level narrows to
                // object scope below the first level
                if matches!(scope, Scope::OneLevel | Scope::Subtree) {
                    let mut child_request =
                        SearchRequest::new(source_dn.clone(), Scope::OneLevel, FILTER_TRUE);
                    child_request.attributes =
                        vec![ALL_USER_ATTRIBUTES.to_string(), REF_AT.to_string()];

                    match self.transport.search(&child_request, monitor).await {
                        Ok(children) => {
                            let child_scope = match scope {
                                Scope::OneLevel => Scope::Object,
                                other => other,
                            };
                            copied += self
                                .copy_items(
                                    children.items,
                                    new_dn,
                                    None,
                                    child_scope,
                                    resolver,
                                    monitor,
                                )
                                .await;
                        }
                        Err(error) => monitor.report_directory_error(error),
                    }
                }
            }
            copied
        }
        .boxed()
    }
}

fn referral_controls(attributes: &Attributes) -> Vec<Control> {
    let is_referral = attributes
        .get(OBJECT_CLASS_AT)
        .is_some_and(|oc| oc.contains_text(REFERRAL_OC));
    if is_referral {
        vec![Control::manage_dsa_it()]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirmirror_core::transport::Attribute;

    #[test]
    fn test_alternate_rdn_sequence() {
        let original = Rdn::new("cn", "alice");
        assert_eq!(alternate_rdn(&original, 1).to_string(), "cn=Copy of alice");
        assert_eq!(alternate_rdn(&original, 2).to_string(), "cn=Copy 2 of alice");
        assert_eq!(alternate_rdn(&original, 3).to_string(), "cn=Copy 3 of alice");
    }

    #[test]
    fn test_apply_new_rdn_single_value() {
        let mut attrs: Attributes =
            [Attribute::with_values("cn", ["alice"])].into_iter().collect();
        apply_new_rdn(&mut attrs, &Rdn::new("cn", "alice"), &Rdn::new("cn", "bob"));
        let cn = attrs.get("cn").unwrap();
        assert_eq!(cn.values.len(), 1);
        assert!(cn.contains_text("bob"));
    }

    #[test]
    fn test_apply_new_rdn_multi_value_keeps_others() {
        let mut attrs: Attributes =
            [Attribute::with_values("cn", ["alice", "ally"])].into_iter().collect();
        apply_new_rdn(&mut attrs, &Rdn::new("cn", "alice"), &Rdn::new("cn", "alicia"));
        let cn = attrs.get("cn").unwrap();
        assert!(cn.contains_text("ally"));
        assert!(cn.contains_text("alicia"));
        assert!(!cn.contains_text("alice"));
    }

    #[test]
    fn test_apply_new_rdn_drops_emptied_attribute() {
        let mut attrs: Attributes =
            [Attribute::with_values("uid", ["u1"]), Attribute::with_values("cn", ["x"])]
                .into_iter()
                .collect();
        apply_new_rdn(&mut attrs, &Rdn::new("uid", "u1"), &Rdn::new("cn", "y"));
        assert!(attrs.get("uid").is_none());
        assert!(attrs.get("cn").unwrap().contains_text("y"));
    }

    #[tokio::test]
    async fn test_alternate_name_policy_aborts_past_limit() {
        let policy = ConflictPolicy::AlternateName { limit: 2 };
        let conflict = CopyConflict {
            existing_dn: Dn::parse("cn=x").unwrap(),
            original_rdn: Rdn::new("cn", "x"),
            attempt: 3,
        };
        assert!(matches!(
            policy.resolve(&conflict).await,
            ConflictDecision::Abort
        ));
    }
}
