//! Distinguished-name paths.
//!
//! A [`Dn`] is an ordered, leaf-first sequence of [`Rdn`] components, each of
//! which is one or more attribute/value pairs ([`Ava`]). The textual form is
//! the usual comma-separated rendering (`cn=alice,ou=users,dc=example,dc=com`)
//! with backslash escapes for separator characters.
//!
//! Display preserves the text as written; equality, hashing and ancestry
//! tests use a normalized (lowercase-folded) form so that `OU=Users` and
//! `ou=users` name the same subtree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Characters that must be escaped inside an attribute value.
const ESCAPED: &[char] = &[',', '+', '=', '\\', '"', ';', '<', '>'];

/// Fold a name component for comparison.
///
/// Attribute types and values compare via simple lowercase folding
/// (caseIgnoreMatch default); schema-driven matching rules are out of scope.
pub fn normalize_str(s: &str) -> String {
    s.trim().to_lowercase()
}

/// One attribute/value assertion, e.g. `cn=alice`.
#[derive(Debug, Clone)]
pub struct Ava {
    attr_type: String,
    value: String,
}

impl Ava {
    pub fn new(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr_type: attr_type.into(),
            value: value.into(),
        }
    }

    /// The attribute type as written, e.g. `cn`.
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// The value as written (unescaped).
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn normalized_type(&self) -> String {
        normalize_str(&self.attr_type)
    }

    pub fn normalized_value(&self) -> String {
        normalize_str(&self.value)
    }
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr_type, escape_value(&self.value))
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_type() == other.normalized_type()
            && self.normalized_value() == other.normalized_value()
    }
}

impl Eq for Ava {}

/// A relative distinguished name: one or more AVAs joined by `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// Create a single-valued RDN.
    pub fn new(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            avas: vec![Ava::new(attr_type, value)],
        }
    }

    /// Create a (possibly multi-valued) RDN from AVAs.
    ///
    /// Returns `None` for an empty AVA list.
    pub fn from_avas(avas: Vec<Ava>) -> Option<Self> {
        if avas.is_empty() {
            None
        } else {
            Some(Self { avas })
        }
    }

    /// Parse from textual form, e.g. `cn=alice` or `cn=a+sn=b`.
    pub fn parse(s: &str) -> Result<Self, DnParseError> {
        let mut avas = Vec::new();
        for part in split_unescaped(s, '+') {
            avas.push(parse_ava(&part)?);
        }
        Rdn::from_avas(avas).ok_or(DnParseError::EmptyRdn)
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// The first AVA's type; the common single-valued case.
    pub fn attr_type(&self) -> &str {
        self.avas[0].attr_type()
    }

    /// The first AVA's value; the common single-valued case.
    pub fn value(&self) -> &str {
        self.avas[0].value()
    }

    /// Normalized rendering used as a child-set key and cache key fragment.
    pub fn normalized(&self) -> String {
        let mut parts: Vec<String> = self
            .avas
            .iter()
            .map(|ava| format!("{}={}", ava.normalized_type(), escape_value(&ava.normalized_value())))
            .collect();
        // multi-valued RDNs compare order-insensitively
        parts.sort();
        parts.join("+")
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ava in &self.avas {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{ava}")?;
            first = false;
        }
        Ok(())
    }
}

/// A distinguished name: leaf-first RDN sequence. The empty DN is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty DN (tree root).
    pub fn root() -> Self {
        Self { rdns: Vec::new() }
    }

    /// Parse from textual form. An empty or blank string is the root DN.
    pub fn parse(s: &str) -> Result<Self, DnParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut rdns = Vec::new();
        for part in split_unescaped(s, ',') {
            rdns.push(Rdn::parse(&part)?);
        }
        Ok(Self { rdns })
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDN components.
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// Leaf RDN, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Leaf-first RDN components.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Parent DN; `None` for the root.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// The DN of a child of `self` named by `rdn`.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend_from_slice(&self.rdns);
        Dn { rdns }
    }

    /// True if `self` is `ancestor` or lies below it.
    pub fn is_within(&self, ancestor: &Dn) -> bool {
        if ancestor.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(ancestor.rdns.iter())
            .all(|(a, b)| a.normalized() == b.normalized())
    }

    /// True if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.is_within(ancestor)
    }

    /// Re-root a DN under a new base: `cn=a,ou=x` rebased from `ou=x` onto
    /// `ou=y` yields `cn=a,ou=y`. Returns `None` if `self` is not within
    /// `old_base`.
    pub fn rebase(&self, old_base: &Dn, new_base: &Dn) -> Option<Dn> {
        if !self.is_within(old_base) {
            return None;
        }
        let keep = self.rdns.len() - old_base.rdns.len();
        let mut rdns = self.rdns[..keep].to_vec();
        rdns.extend_from_slice(&new_base.rdns);
        Some(Dn { rdns })
    }

    /// Normalized rendering; the entry-cache key.
    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(|rdn| rdn.normalized())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Normalized segments root-first, for lock-identifier construction.
    pub fn segments_root_first(&self) -> Vec<String> {
        self.rdns.iter().rev().map(|rdn| rdn.normalized()).collect()
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for rdn in &self.rdns {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{rdn}")?;
            first = false;
        }
        Ok(())
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len()
            && self
                .rdns
                .iter()
                .zip(other.rdns.iter())
                .all(|(a, b)| a.normalized() == b.normalized())
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for rdn in &self.rdns {
            rdn.normalized().hash(state);
        }
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> Self {
        dn.to_string()
    }
}

impl TryFrom<String> for Dn {
    type Error = DnParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Dn::parse(&s)
    }
}

impl std::str::FromStr for Dn {
    type Err = DnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

/// Errors from parsing textual DNs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnParseError {
    #[error("empty RDN component")]
    EmptyRdn,

    #[error("missing '=' in component: {0}")]
    MissingEquals(String),

    #[error("empty attribute type in component: {0}")]
    EmptyAttributeType(String),

    #[error("trailing escape character")]
    TrailingEscape,
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if ESCAPED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Split on an unescaped separator, keeping escape sequences intact; the
/// pieces are unescaped later, at the AVA stage.
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push('\\');
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unescape(s: &str) -> Result<String, DnParseError> {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    if escaped {
        return Err(DnParseError::TrailingEscape);
    }
    Ok(out)
}

fn parse_ava(part: &str) -> Result<Ava, DnParseError> {
    // the first unescaped '=' separates type from value
    let mut split = None;
    let mut escaped = false;
    for (index, c) in part.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' {
            split = Some(index);
            break;
        }
    }
    let split = split.ok_or_else(|| DnParseError::MissingEquals(part.to_string()))?;
    let attr_type = part[..split].trim();
    if attr_type.is_empty() {
        return Err(DnParseError::EmptyAttributeType(part.to_string()));
    }
    let value = unescape(part[split + 1..].trim())?;
    Ok(Ava::new(attr_type, value))
}
