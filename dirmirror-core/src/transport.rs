//! The directory transport abstraction and its request/response types.
//!
//! The transport is an opaque collaborator that performs one remote
//! round-trip per call and raises a classified [`DirectoryError`] rather
//! than a generic fault. Everything above it (search engine, subtree
//! operations) is transport-agnostic.

use crate::controls::{Control, SearchControl};
use crate::dn::{Dn, Rdn, normalize_str};
use crate::error::DirectoryError;
use crate::monitor::ProgressMonitor;
use crate::schema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Requested-attribute pseudo-description: all user attributes.
pub const ALL_USER_ATTRIBUTES: &str = "*";

/// Requested-attribute pseudo-description: all operational attributes.
pub const ALL_OPERATIONAL_ATTRIBUTES: &str = "+";

/// Requested-attribute pseudo-description: no attributes at all.
pub const NO_ATTRIBUTES: &str = "1.1";

/// The match-everything filter.
pub const FILTER_TRUE: &str = "(objectClass=*)";

/// Filter matching subentries.
pub const FILTER_SUBENTRY: &str = "(objectClass=subentry)";

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Object,
    OneLevel,
    Subtree,
}

/// Alias dereferencing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasDereference {
    Never,
    Searching,
    Finding,
    Always,
}

/// Referral handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralHandling {
    /// Treat referral entries as ordinary results (no chasing).
    Ignore,
    /// Chase referrals transparently.
    Follow,
    /// Return referral redirects as continuation items.
    Manual,
}

/// One attribute value, text or binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Binary(Vec<u8>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Case-folded comparison against a text value. Binary values never
    /// match text.
    pub fn matches_text(&self, other: &str) -> bool {
        self.as_text()
            .is_some_and(|s| normalize_str(s) == normalize_str(other))
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// One attribute with its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub description: String,
    pub values: Vec<AttrValue>,
}

impl Attribute {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            values: Vec::new(),
        }
    }

    pub fn with_values<V: Into<AttrValue>>(
        description: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            description: description.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is(&self, description: &str) -> bool {
        normalize_str(&self.description) == normalize_str(description)
    }

    pub fn is_operational(&self) -> bool {
        schema::is_operational_attribute(&self.description)
    }

    /// Text values, skipping binary ones.
    pub fn text_values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(AttrValue::as_text)
    }

    pub fn contains_text(&self, value: &str) -> bool {
        self.values.iter().any(|v| v.matches_text(value))
    }
}

/// An ordered attribute list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    attrs: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, description: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.is(description))
    }

    pub fn get_mut(&mut self, description: &str) -> Option<&mut Attribute> {
        self.attrs.iter_mut().find(|a| a.is(description))
    }

    /// Insert or replace the attribute with the same description.
    pub fn put(&mut self, attribute: Attribute) {
        match self.attrs.iter_mut().find(|a| a.is(&attribute.description)) {
            Some(existing) => *existing = attribute,
            None => self.attrs.push(attribute),
        }
    }

    /// Add a text value, creating the attribute if missing; duplicate values
    /// (case-folded) are not added twice.
    pub fn add_value(&mut self, description: &str, value: &str) {
        match self.get_mut(description) {
            Some(attr) => {
                if !attr.contains_text(value) {
                    attr.values.push(AttrValue::from(value));
                }
            }
            None => self.put(Attribute::with_values(description, [value])),
        }
    }

    /// Remove one text value; the attribute is dropped when fully emptied.
    pub fn remove_value(&mut self, description: &str, value: &str) {
        if let Some(attr) = self.get_mut(description) {
            attr.values.retain(|v| !v.matches_text(value));
            if attr.values.is_empty() {
                self.remove(description);
            }
        }
    }

    pub fn remove(&mut self, description: &str) -> Option<Attribute> {
        let index = self.attrs.iter().position(|a| a.is(description))?;
        Some(self.attrs.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for attr in iter {
            attrs.put(attr);
        }
        attrs
    }
}

/// Parameters of one physical search round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub base: Dn,
    pub scope: Scope,
    pub filter: String,
    /// Requested attribute descriptions; may contain `*`, `+` and `1.1`.
    pub attributes: Vec<String>,
    /// 0 means no client-requested limit.
    pub size_limit: u32,
    /// Seconds; 0 means no client-requested limit.
    pub time_limit: u32,
    pub alias_dereference: AliasDereference,
    pub referral_handling: ReferralHandling,
    pub controls: Vec<SearchControl>,
}

impl SearchRequest {
    pub fn new(base: Dn, scope: Scope, filter: impl Into<String>) -> Self {
        Self {
            base,
            scope,
            filter: filter.into(),
            attributes: vec![ALL_USER_ATTRIBUTES.to_string()],
            size_limit: 0,
            time_limit: 0,
            alias_dereference: AliasDereference::Never,
            referral_handling: ReferralHandling::Ignore,
            controls: Vec::new(),
        }
    }

    /// The paged-results request control, if attached.
    pub fn paged_results(&self) -> Option<&crate::controls::PagedResults> {
        self.controls.iter().find_map(SearchControl::as_paged_results)
    }

    pub fn requests_attribute(&self, description: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| normalize_str(a) == normalize_str(description))
    }
}

/// One item of a search response.
#[derive(Debug, Clone)]
pub enum SearchItem {
    /// A resolved object.
    Object { dn: Dn, attributes: Attributes },
    /// A referral redirect to be resolved elsewhere.
    Continuation { url: String },
}

/// The outcome of one physical search round-trip.
///
/// A server may deliver items and then terminate the result stream with a
/// classified error (typically a limit); such partial outcomes carry both
/// the items and the terminating error.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
    pub controls: Vec<SearchControl>,
    pub terminating_error: Option<DirectoryError>,
}

impl SearchResponse {
    /// The paged-results response control, if present.
    pub fn paged_results(&self) -> Option<&crate::controls::PagedResults> {
        self.controls.iter().find_map(SearchControl::as_paged_results)
    }
}

/// Attribute modification operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOperation {
    Add,
    Replace,
    Remove,
}

/// One attribute modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub operation: ModifyOperation,
    pub attribute: Attribute,
}

impl Modification {
    pub fn replace(attribute: Attribute) -> Self {
        Self {
            operation: ModifyOperation::Replace,
            attribute,
        }
    }
}

/// Synchronous remote directory access: one blocking round-trip per call,
/// classified errors, cancellation via the monitor.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    /// Identifier of the underlying connection; part of every lock
    /// identifier derived from entries of this directory.
    fn connection_id(&self) -> &str;

    async fn search(
        &self,
        request: &SearchRequest,
        monitor: &ProgressMonitor,
    ) -> Result<SearchResponse, DirectoryError>;

    async fn create_entry(
        &self,
        dn: &Dn,
        attributes: &Attributes,
        controls: &[Control],
        monitor: &ProgressMonitor,
    ) -> Result<(), DirectoryError>;

    async fn modify_entry(
        &self,
        dn: &Dn,
        modifications: &[Modification],
        controls: &[Control],
        monitor: &ProgressMonitor,
    ) -> Result<(), DirectoryError>;

    async fn delete_entry(
        &self,
        dn: &Dn,
        controls: &[Control],
        monitor: &ProgressMonitor,
    ) -> Result<(), DirectoryError>;

    async fn rename_entry(
        &self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        controls: &[Control],
        monitor: &ProgressMonitor,
    ) -> Result<(), DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_case_insensitive_lookup() {
        let mut attrs = Attributes::new();
        attrs.put(Attribute::with_values("objectClass", ["person"]));
        assert!(attrs.get("OBJECTCLASS").is_some());
        assert!(attrs.get("objectclass").unwrap().contains_text("PERSON"));
    }

    #[test]
    fn test_add_value_no_duplicates() {
        let mut attrs = Attributes::new();
        attrs.add_value("cn", "alice");
        attrs.add_value("cn", "Alice");
        assert_eq!(attrs.get("cn").unwrap().values.len(), 1);
        attrs.add_value("cn", "bob");
        assert_eq!(attrs.get("cn").unwrap().values.len(), 2);
    }

    #[test]
    fn test_remove_value_drops_empty_attribute() {
        let mut attrs = Attributes::new();
        attrs.add_value("cn", "alice");
        attrs.remove_value("cn", "ALICE");
        assert!(attrs.get("cn").is_none());
    }

    #[test]
    fn test_multi_valued_keeps_other_values() {
        let mut attrs = Attributes::new();
        attrs.put(Attribute::with_values("cn", ["alice", "ally"]));
        attrs.remove_value("cn", "alice");
        let cn = attrs.get("cn").unwrap();
        assert_eq!(cn.values.len(), 1);
        assert!(cn.contains_text("ally"));
    }

    #[test]
    fn test_request_attribute_check() {
        let request = SearchRequest::new(Dn::root(), Scope::OneLevel, FILTER_TRUE);
        assert!(request.requests_attribute("*"));
        assert!(!request.requests_attribute("objectClass"));
    }

    #[test]
    fn test_binary_value_never_matches_text() {
        let value = AttrValue::Binary(vec![0x61, 0x62]);
        assert!(!value.matches_text("ab"));
    }
}
