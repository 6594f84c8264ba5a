//! Concrete schedulable tasks.
//!
//! Each task declares the tree regions it locks, delegates its work to an
//! engine, and emits one coarse-grained event after a non-canceled run.

use crate::children::{ChildrenEngine, ChildrenOptions};
use crate::lock::LockTarget;
use crate::ops::{ConflictResolver, CopyEngine, DeleteEngine, RenameEngine};
use crate::registry::SearchRegistry;
use crate::scheduler::Task;
use crate::search::{Search, SearchEngine};
use async_trait::async_trait;
use dirmirror_core::dn::{Dn, Rdn};
use dirmirror_core::event::{EventBus, TreeEvent};
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_core::transport::Scope;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Runs one logical search.
pub struct SearchTask {
    engine: Arc<SearchEngine>,
    registry: Arc<SearchRegistry>,
    search: Arc<Search>,
    events: EventBus,
}

impl SearchTask {
    pub fn new(
        engine: Arc<SearchEngine>,
        registry: Arc<SearchRegistry>,
        search: Arc<Search>,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            registry,
            search,
            events,
        }
    }
}

#[async_trait]
impl Task for SearchTask {
    fn name(&self) -> String {
        format!("Search {}", self.search.name())
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        vec![LockTarget::new(
            self.engine.transport().connection_id(),
            self.search.parameters().base.clone(),
        )]
    }

    async fn run(&self, monitor: &ProgressMonitor) {
        self.registry.register(&self.search);
        self.engine.execute(&self.search, monitor).await;
    }

    async fn notify(&self, _monitor: &ProgressMonitor) {
        self.events.emit(TreeEvent::SearchPerformed {
            search_id: self.search.id(),
        });
    }
}

/// Enumerates the children of one entry.
pub struct InitializeChildrenTask {
    engine: Arc<ChildrenEngine>,
    parent: Dn,
    options: ChildrenOptions,
    next_page: bool,
    events: EventBus,
}

impl InitializeChildrenTask {
    pub fn new(
        engine: Arc<ChildrenEngine>,
        parent: Dn,
        options: ChildrenOptions,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            parent,
            options,
            next_page: false,
            events,
        }
    }

    /// Fetch the next scroll-mode page instead of the first.
    pub fn next_page(mut self) -> Self {
        self.next_page = true;
        self
    }
}

#[async_trait]
impl Task for InitializeChildrenTask {
    fn name(&self) -> String {
        format!("Initialize children of {}", self.parent)
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        vec![LockTarget::new(
            self.engine.connection_id(),
            self.parent.clone(),
        )]
    }

    async fn run(&self, monitor: &ProgressMonitor) {
        if self.next_page {
            self.engine
                .next_children_page(&self.parent, &self.options, monitor)
                .await;
        } else {
            self.engine
                .initialize_children(&self.parent, &self.options, monitor)
                .await;
        }
    }

    async fn notify(&self, _monitor: &ProgressMonitor) {
        self.events.emit(TreeEvent::ChildrenChanged {
            parent: self.parent.clone(),
        });
    }
}

/// Copies entries under a new parent.
pub struct CopyEntriesTask {
    engine: Arc<CopyEngine>,
    sources: Vec<Dn>,
    target: Dn,
    scope: Scope,
    resolver: Option<Arc<dyn ConflictResolver>>,
    copied: AtomicU32,
    events: EventBus,
}

impl CopyEntriesTask {
    pub fn new(
        engine: Arc<CopyEngine>,
        sources: Vec<Dn>,
        target: Dn,
        scope: Scope,
        resolver: Option<Arc<dyn ConflictResolver>>,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            sources,
            target,
            scope,
            resolver,
            copied: AtomicU32::new(0),
            events,
        }
    }

    /// Entries created so far (final once the task completed).
    pub fn copied(&self) -> u32 {
        self.copied.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Task for CopyEntriesTask {
    fn name(&self) -> String {
        format!("Copy {} entries to {}", self.sources.len(), self.target)
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        let connection = self.engine.connection_id().to_string();
        let mut targets = vec![LockTarget::new(connection.clone(), self.target.clone())];
        targets.extend(
            self.sources
                .iter()
                .map(|dn| LockTarget::new(connection.clone(), dn.clone())),
        );
        targets
    }

    async fn run(&self, monitor: &ProgressMonitor) {
        let copied = self
            .engine
            .copy_entries(
                &self.sources,
                &self.target,
                self.scope,
                self.resolver.as_deref(),
                monitor,
            )
            .await;
        self.copied.store(copied, Ordering::Release);
    }

    async fn notify(&self, _monitor: &ProgressMonitor) {
        // one event for the whole batch, not one per copied entry
        self.events.emit(TreeEvent::BulkModification {
            connection_id: self.engine.connection_id().to_string(),
        });
    }
}

/// Deletes entries with their subtrees.
pub struct DeleteEntriesTask {
    engine: Arc<DeleteEngine>,
    entries: Vec<Dn>,
    deleted: AtomicU32,
    events: EventBus,
}

impl DeleteEntriesTask {
    pub fn new(engine: Arc<DeleteEngine>, entries: Vec<Dn>, events: EventBus) -> Self {
        Self {
            engine,
            entries,
            deleted: AtomicU32::new(0),
            events,
        }
    }

    /// Entries deleted so far (final once the task completed).
    pub fn deleted(&self) -> u32 {
        self.deleted.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Task for DeleteEntriesTask {
    fn name(&self) -> String {
        format!("Delete {} entries", self.entries.len())
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        let connection = self.engine.connection_id().to_string();
        self.entries
            .iter()
            .map(|dn| LockTarget::new(connection.clone(), dn.clone()))
            .collect()
    }

    async fn run(&self, monitor: &ProgressMonitor) {
        let deleted = self.engine.delete_entries(&self.entries, monitor).await;
        self.deleted.store(deleted, Ordering::Release);
    }

    async fn notify(&self, _monitor: &ProgressMonitor) {
        self.events.emit(TreeEvent::BulkModification {
            connection_id: self.engine.connection_id().to_string(),
        });
    }
}

/// Renames one entry.
pub struct RenameEntryTask {
    engine: Arc<RenameEngine>,
    dn: Dn,
    new_rdn: Rdn,
    delete_old_rdn: bool,
    simulate_on_non_leaf: bool,
    renamed_to: Mutex<Option<Dn>>,
    events: EventBus,
}

impl RenameEntryTask {
    pub fn new(
        engine: Arc<RenameEngine>,
        dn: Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
        simulate_on_non_leaf: bool,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            dn,
            new_rdn,
            delete_old_rdn,
            simulate_on_non_leaf,
            renamed_to: Mutex::new(None),
            events,
        }
    }

    /// The new DN, once the rename succeeded.
    pub fn renamed_to(&self) -> Option<Dn> {
        self.renamed_to.lock().clone()
    }
}

#[async_trait]
impl Task for RenameEntryTask {
    fn name(&self) -> String {
        format!("Rename {}", self.dn)
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        let connection = self.engine.connection_id().to_string();
        let mut targets = vec![LockTarget::new(connection.clone(), self.dn.clone())];
        if let Some(parent) = self.dn.parent() {
            targets.push(LockTarget::new(connection, parent));
        }
        targets
    }

    async fn run(&self, monitor: &ProgressMonitor) {
        let new_dn = self
            .engine
            .rename(
                &self.dn,
                self.new_rdn.clone(),
                self.delete_old_rdn,
                self.simulate_on_non_leaf,
                monitor,
            )
            .await;
        *self.renamed_to.lock() = new_dn;
    }

    async fn notify(&self, _monitor: &ProgressMonitor) {
        if let Some(new_dn) = self.renamed_to() {
            self.events.emit(TreeEvent::EntryRenamed {
                old_dn: self.dn.clone(),
                new_dn,
            });
        }
    }
}
