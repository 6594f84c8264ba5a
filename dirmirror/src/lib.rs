//! dirmirror: mirror a remote hierarchical directory service into a local
//! in-memory tree and operate on it safely.
//!
//! [`DirectoryMirror`] wires one transport, one schema provider and one
//! entry cache together with the lock-aware task scheduler. All operations
//! are submitted as tasks: tasks touching overlapping tree regions are
//! serialized, disjoint tasks run in parallel, and every completed task
//! reports success, cancellation, or an ordered error record list.
//!
//! # Example
//!
//! ```no_run
//! use dirmirror::DirectoryMirror;
//! use dirmirror::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn DirectoryTransport>) {
//! let schema = Arc::new(StaticSchema::default());
//! let mirror = DirectoryMirror::new(transport, schema, MirrorConfig::default());
//!
//! let params = SearchParameters::new(
//!     Dn::parse("ou=users,dc=example,dc=com").unwrap(),
//!     Scope::OneLevel,
//!     "(objectClass=person)",
//! );
//! let (search, handle) = mirror.search("users", params);
//! let report = handle.wait().await;
//! println!("{:?}: {} entries", report.status, search.hits().len());
//! # }
//! ```

use dirmirror_core::config::MirrorConfig;
use dirmirror_core::dn::{Dn, Rdn};
use dirmirror_core::event::EventBus;
use dirmirror_core::schema::SchemaProvider;
use dirmirror_core::transport::{DirectoryTransport, Scope};
use dirmirror_engine::children::{ChildrenEngine, ChildrenOptions};
use dirmirror_engine::ops::{ConflictResolver, CopyEngine, DeleteEngine, RenameEngine};
use dirmirror_engine::registry::SearchRegistry;
use dirmirror_engine::scheduler::{TaskHandle, TaskScheduler};
use dirmirror_engine::search::{Search, SearchEngine, SearchParameters};
use dirmirror_engine::tasks::{
    CopyEntriesTask, DeleteEntriesTask, InitializeChildrenTask, RenameEntryTask, SearchTask,
};
use dirmirror_tree::cache::EntryCache;
use std::sync::Arc;

pub use dirmirror_core as core;
pub use dirmirror_engine as engine;
pub use dirmirror_tree as tree;

/// One mirrored directory connection: cache, engines, scheduler and event
/// bus behind a single handle.
pub struct DirectoryMirror {
    config: MirrorConfig,
    cache: Arc<EntryCache>,
    scheduler: Arc<TaskScheduler>,
    registry: Arc<SearchRegistry>,
    events: EventBus,
    search_engine: Arc<SearchEngine>,
    children_engine: Arc<ChildrenEngine>,
    copy_engine: Arc<CopyEngine>,
    delete_engine: Arc<DeleteEngine>,
    rename_engine: Arc<RenameEngine>,
}

impl DirectoryMirror {
    pub fn new(
        transport: Arc<dyn DirectoryTransport>,
        schema: Arc<dyn SchemaProvider>,
        config: MirrorConfig,
    ) -> Self {
        let cache = Arc::new(EntryCache::new(transport.connection_id()));
        let registry = Arc::new(SearchRegistry::new());
        let events = EventBus::default();

        let search_engine = Arc::new(SearchEngine::new(
            Arc::clone(&transport),
            schema,
            Arc::clone(&cache),
        ));
        let children_engine = Arc::new(ChildrenEngine::new(
            Arc::clone(&search_engine),
            Arc::clone(&cache),
        ));
        let copy_engine = Arc::new(CopyEngine::new(
            Arc::clone(&transport),
            Arc::clone(&cache),
            config.operations.continue_on_error,
        ));
        let delete_engine = Arc::new(DeleteEngine::new(
            Arc::clone(&transport),
            Arc::clone(&cache),
            Arc::clone(&registry),
            config.operations.delete_batch_size,
            config.operations.continue_on_error,
        ));
        let rename_engine = Arc::new(RenameEngine::new(
            transport,
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::clone(&search_engine),
            Arc::clone(&copy_engine),
            Arc::clone(&delete_engine),
        ));

        Self {
            config,
            cache,
            scheduler: TaskScheduler::new(),
            registry,
            events,
            search_engine,
            children_engine,
            copy_engine,
            delete_engine,
            rename_engine,
        }
    }

    pub fn cache(&self) -> &Arc<EntryCache> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Submit a search task; the returned search carries the merged results
    /// once the task completed.
    pub fn search(
        &self,
        name: impl Into<String>,
        params: SearchParameters,
    ) -> (Arc<Search>, TaskHandle) {
        let search = Arc::new(Search::new(name, params));
        let task = SearchTask::new(
            Arc::clone(&self.search_engine),
            Arc::clone(&self.registry),
            Arc::clone(&search),
            self.events.clone(),
        );
        (search, self.scheduler.submit(task))
    }

    /// Enumerate the children of `parent` with the configured paging.
    pub fn initialize_children(&self, parent: Dn) -> TaskHandle {
        let task = InitializeChildrenTask::new(
            Arc::clone(&self.children_engine),
            parent,
            ChildrenOptions::from_config(&self.config),
            self.events.clone(),
        );
        self.scheduler.submit(task)
    }

    /// Fetch the next scroll-mode children page of `parent`.
    pub fn next_children_page(&self, parent: Dn) -> TaskHandle {
        let task = InitializeChildrenTask::new(
            Arc::clone(&self.children_engine),
            parent,
            ChildrenOptions::from_config(&self.config),
            self.events.clone(),
        )
        .next_page();
        self.scheduler.submit(task)
    }

    /// Copy `sources` under `target`, resolving entry-exists conflicts
    /// through `resolver` when supplied.
    pub fn copy_entries(
        &self,
        sources: Vec<Dn>,
        target: Dn,
        scope: Scope,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> (Arc<CopyEntriesTask>, TaskHandle) {
        let task = Arc::new(CopyEntriesTask::new(
            Arc::clone(&self.copy_engine),
            sources,
            target,
            scope,
            resolver,
            self.events.clone(),
        ));
        (Arc::clone(&task), self.scheduler.submit(task))
    }

    /// Delete `entries` with their subtrees.
    pub fn delete_entries(&self, entries: Vec<Dn>) -> (Arc<DeleteEntriesTask>, TaskHandle) {
        let task = Arc::new(DeleteEntriesTask::new(
            Arc::clone(&self.delete_engine),
            entries,
            self.events.clone(),
        ));
        (Arc::clone(&task), self.scheduler.submit(task))
    }

    /// Rename `dn` to `new_rdn`, simulating via copy+delete when the server
    /// refuses to rename a non-leaf entry.
    pub fn rename_entry(
        &self,
        dn: Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
        simulate_on_non_leaf: bool,
    ) -> (Arc<RenameEntryTask>, TaskHandle) {
        let task = Arc::new(RenameEntryTask::new(
            Arc::clone(&self.rename_engine),
            dn,
            new_rdn,
            delete_old_rdn,
            simulate_on_non_leaf,
            self.events.clone(),
        ));
        (Arc::clone(&task), self.scheduler.submit(task))
    }
}

/// Install a global tracing subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Prelude module with commonly used types.
pub mod prelude {
    pub use crate::DirectoryMirror;
    pub use dirmirror_core::prelude::*;
    pub use dirmirror_engine::children::ChildrenOptions;
    pub use dirmirror_engine::ops::{
        ConflictDecision, ConflictPolicy, ConflictResolver, CopyConflict,
    };
    pub use dirmirror_engine::scheduler::{TaskHandle, TaskReport, TaskStatus};
    pub use dirmirror_engine::search::{Search, SearchHit, SearchParameters};
    pub use dirmirror_tree::cache::EntryCache;
    pub use dirmirror_tree::entry::Entry;
}
