//! Request and response controls.
//!
//! Controls are opaque OID-tagged extensions attached to transport calls.
//! The paged-results control is modeled explicitly because the search engine
//! drives pagination through it; everything else passes through untouched.

use serde::{Deserialize, Serialize};

/// ManageDsaIT: treat referral entries as plain objects.
pub const MANAGE_DSA_IT_OID: &str = "2.16.840.1.113730.3.4.2";

/// Subentries control: include subentries in search results.
pub const SUBENTRIES_OID: &str = "1.3.6.1.4.1.4203.1.10.1";

/// Simple paged results.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// A generic request or response control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value: None,
        }
    }

    pub fn manage_dsa_it() -> Self {
        Self::new(MANAGE_DSA_IT_OID, false)
    }

    pub fn subentries() -> Self {
        Self::new(SUBENTRIES_OID, true)
    }
}

/// The paged-results request/response control.
///
/// On a request the cookie resumes a previous page (empty for the first
/// page); on a response a non-empty cookie means more pages exist. In scroll
/// mode the engine surfaces next/top-page follow-up searches instead of
/// auto-continuing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResults {
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Vec<u8>>,
    pub critical: bool,
    pub scroll_mode: bool,
}

impl PagedResults {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            cookie: None,
            critical: true,
            scroll_mode: false,
        }
    }

    pub fn scroll(size: u32) -> Self {
        Self {
            scroll_mode: true,
            ..Self::new(size)
        }
    }

    pub fn with_cookie(mut self, cookie: Option<Vec<u8>>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// A control attached to a search: either the modeled paged-results control
/// or a pass-through OID control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchControl {
    PagedResults(PagedResults),
    Other(Control),
}

impl SearchControl {
    pub fn oid(&self) -> &str {
        match self {
            Self::PagedResults(_) => PAGED_RESULTS_OID,
            Self::Other(control) => &control.oid,
        }
    }

    pub fn as_paged_results(&self) -> Option<&PagedResults> {
        match self {
            Self::PagedResults(paged) => Some(paged),
            Self::Other(_) => None,
        }
    }
}

impl From<PagedResults> for SearchControl {
    fn from(paged: PagedResults) -> Self {
        Self::PagedResults(paged)
    }
}

impl From<Control> for SearchControl {
    fn from(control: Control) -> Self {
        Self::Other(control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_results_cookie() {
        let control = PagedResults::new(100);
        assert!(!control.has_cookie());
        let control = control.with_cookie(Some(vec![1, 2, 3]));
        assert!(control.has_cookie());
        let control = control.with_cookie(Some(Vec::new()));
        assert!(!control.has_cookie());
    }

    #[test]
    fn test_search_control_oid() {
        let paged: SearchControl = PagedResults::new(10).into();
        assert_eq!(paged.oid(), PAGED_RESULTS_OID);
        let other: SearchControl = Control::manage_dsa_it().into();
        assert_eq!(other.oid(), MANAGE_DSA_IT_OID);
        assert!(other.as_paged_results().is_none());
    }
}
