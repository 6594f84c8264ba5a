//! Engines for the dirmirror system.
//!
//! This crate contains all the coordination logic between the directory
//! transport and the entry cache:
//! - [`lock`] / [`scheduler`]: lock-aware task admission; tasks touching
//!   overlapping tree regions never run concurrently
//! - [`search`]: one logical search across pages and referral hops, merged
//!   into the entry cache
//! - [`children`]: paged children enumeration
//! - [`ops`]: recursive copy, delete and rename with conflict/fallback
//!   policies
//! - [`registry`]: open-search bookkeeping for result scrubbing
//! - [`tasks`]: ready-made schedulable tasks over the engines

pub mod children;
pub mod lock;
pub mod ops;
pub mod registry;
pub mod scheduler;
pub mod search;
pub mod tasks;

pub use children::{ChildrenEngine, ChildrenOptions};
pub use lock::{LockId, LockTarget, conflicts, lock_identifiers};
pub use ops::{
    ConflictDecision, ConflictPolicy, ConflictResolver, CopyConflict, CopyEngine, DeleteEngine,
    RenameEngine,
};
pub use registry::SearchRegistry;
pub use scheduler::{Task, TaskHandle, TaskReport, TaskScheduler, TaskStatus};
pub use search::{Search, SearchContinuation, SearchEngine, SearchHit, SearchParameters};
pub use tasks::{
    CopyEntriesTask, DeleteEntriesTask, InitializeChildrenTask, RenameEntryTask, SearchTask,
};
