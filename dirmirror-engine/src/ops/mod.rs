//! Subtree operations: copy, delete, rename.

pub mod copy;
pub mod delete;
pub mod rename;

pub use copy::{
    ConflictDecision, ConflictPolicy, ConflictResolver, CopyConflict, CopyEngine, alternate_rdn,
    apply_new_rdn,
};
pub use delete::DeleteEngine;
pub use rename::RenameEngine;
