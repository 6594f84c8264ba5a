//! Schema and server capability access.
//!
//! The engines never hard-code server capabilities: the [`SchemaProvider`]
//! answers which controls the server advertises and which attribute types
//! its schema defines, so unsupported request controls degrade silently and
//! the best available child-existence hint attribute is chosen per server.

use crate::dn::normalize_str;
use once_cell::sync::Lazy;
use std::collections::HashSet;

pub const OBJECT_CLASS_AT: &str = "objectClass";
pub const HAS_SUBORDINATES_AT: &str = "hasSubordinates";
pub const NUM_SUBORDINATES_AT: &str = "numSubordinates";
pub const SUBORDINATE_COUNT_AT: &str = "subordinateCount";
pub const REF_AT: &str = "ref";

pub const ALIAS_OC: &str = "alias";
pub const REFERRAL_OC: &str = "referral";
pub const SUBENTRY_OC: &str = "subentry";

/// Operational attributes the mirror knows about; used to classify
/// attributes for the `+` pseudo-description handling.
static OPERATIONAL_ATTRIBUTES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "hassubordinates",
        "numsubordinates",
        "subordinatecount",
        "createtimestamp",
        "modifytimestamp",
        "creatorsname",
        "modifiersname",
        "entryuuid",
        "entrydn",
        "entrycsn",
        "subschemasubentry",
        "structuralobjectclass",
        "governingstructurerule",
    ]
    .into_iter()
    .collect()
});

pub fn is_operational_attribute(description: &str) -> bool {
    OPERATIONAL_ATTRIBUTES.contains(normalize_str(description).as_str())
}

/// Server schema and capability lookup.
pub trait SchemaProvider: Send + Sync {
    /// OIDs of controls the server advertises as supported.
    fn supported_controls(&self) -> HashSet<String>;

    /// Whether the schema defines the given attribute type.
    fn has_attribute_type(&self, description: &str) -> bool;

    /// Whether the server advertises support for the given control OID.
    fn supports_control(&self, oid: &str) -> bool {
        let oid = normalize_str(oid);
        self.supported_controls()
            .iter()
            .any(|c| normalize_str(c) == oid)
    }

    /// The best advertised child-existence hint attribute, in preference
    /// order: hasSubordinates, numSubordinates, subordinateCount.
    fn children_hint_attribute(&self) -> Option<&'static str> {
        [HAS_SUBORDINATES_AT, NUM_SUBORDINATES_AT, SUBORDINATE_COUNT_AT]
            .into_iter()
            .find(|at| self.has_attribute_type(at))
    }
}

/// A fixed schema snapshot, typically built from the server's root DSE.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    supported_controls: HashSet<String>,
    attribute_types: HashSet<String>,
}

impl StaticSchema {
    pub fn new(
        supported_controls: impl IntoIterator<Item = impl Into<String>>,
        attribute_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            supported_controls: supported_controls
                .into_iter()
                .map(|s| normalize_str(&s.into()))
                .collect(),
            attribute_types: attribute_types
                .into_iter()
                .map(|s| normalize_str(&s.into()))
                .collect(),
        }
    }
}

impl SchemaProvider for StaticSchema {
    fn supported_controls(&self) -> HashSet<String> {
        self.supported_controls.clone()
    }

    fn has_attribute_type(&self, description: &str) -> bool {
        self.attribute_types.contains(&normalize_str(description))
    }
}
