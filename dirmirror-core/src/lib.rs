//! Core types for dirmirror: a local mirror of a remote hierarchical
//! directory service.
//!
//! This crate holds the leaf abstractions everything else builds on:
//! - [`dn`]: distinguished-name paths with normalized comparison
//! - [`error`]: the classified transport error taxonomy
//! - [`monitor`]: cooperative cancellation plus ordered error records
//! - [`transport`]: the [`transport::DirectoryTransport`] trait and its
//!   request/response types
//! - [`controls`]: request/response controls, including paged results
//! - [`schema`]: server capability lookup ([`schema::SchemaProvider`])
//! - [`event`]: coarse-grained change notifications
//! - [`config`]: layered configuration

pub mod config;
pub mod controls;
pub mod dn;
pub mod error;
pub mod event;
pub mod monitor;
pub mod schema;
pub mod transport;

pub use config::MirrorConfig;
pub use controls::{Control, PagedResults, SearchControl};
pub use dn::{Ava, Dn, DnParseError, Rdn};
pub use error::{DirectoryError, ErrorKind, MirrorError, Result};
pub use event::{EventBus, TreeEvent};
pub use monitor::{ErrorRecord, ProgressMonitor};
pub use schema::{SchemaProvider, StaticSchema};
pub use transport::{
    Attribute, Attributes, AttrValue, DirectoryTransport, Modification, ModifyOperation, Scope,
    SearchItem, SearchRequest, SearchResponse,
};

/// Prelude module with commonly used types.
pub mod prelude {
    pub use crate::config::MirrorConfig;
    pub use crate::controls::{Control, PagedResults, SearchControl};
    pub use crate::dn::{Ava, Dn, Rdn};
    pub use crate::error::{DirectoryError, ErrorKind, MirrorError, Result};
    pub use crate::event::{EventBus, TreeEvent};
    pub use crate::monitor::{ErrorRecord, ProgressMonitor};
    pub use crate::schema::{SchemaProvider, StaticSchema};
    pub use crate::transport::{
        ALL_OPERATIONAL_ATTRIBUTES, ALL_USER_ATTRIBUTES, AliasDereference, Attribute, Attributes,
        AttrValue, DirectoryTransport, FILTER_SUBENTRY, FILTER_TRUE, Modification,
        ModifyOperation, NO_ATTRIBUTES, ReferralHandling, Scope, SearchItem, SearchRequest,
        SearchResponse,
    };
}
