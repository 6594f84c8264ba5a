//! The mirrored entry tree: entry model and path-keyed cache.
//!
//! An [`Entry`] mirrors one remote directory object; the [`EntryCache`] owns
//! all entries of one connection and keeps the tree shape consistent while
//! the engines mutate it.

pub mod cache;
pub mod entry;

pub use cache::{EntryCache, ExistenceProbe};
pub use entry::{ChildrenPaging, Entry};
