//! In-memory scripted directory server used by the integration tests.

use async_trait::async_trait;
use dirmirror::prelude::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// One transport call, for asserting call counts and ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Search { base: String, scope: Scope },
    Create { dn: String },
    Modify { dn: String },
    Delete { dn: String },
    Rename { dn: String, new_rdn: String },
}

struct StoredEntry {
    dn: Dn,
    attributes: Attributes,
}

struct State {
    tree: BTreeMap<String, StoredEntry>,
    sessions: HashMap<Vec<u8>, Vec<(Dn, Attributes)>>,
    next_cookie: u64,
    calls: Vec<Call>,
    refuse_non_leaf_rename: bool,
}

/// A fake directory server over an in-memory tree: honors scopes, simple
/// equality filters, paged results, and classified errors.
pub struct FakeDirectory {
    connection_id: String,
    state: Mutex<State>,
}

impl FakeDirectory {
    pub fn new(connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            state: Mutex::new(State {
                tree: BTreeMap::new(),
                sessions: HashMap::new(),
                next_cookie: 1,
                calls: Vec::new(),
                refuse_non_leaf_rename: false,
            }),
        }
    }

    /// Seed one entry; ancestors are not implied.
    pub fn add(&self, dn: &str, attributes: &[(&str, &[&str])]) {
        let dn = Dn::parse(dn).unwrap();
        let attributes: Attributes = attributes
            .iter()
            .map(|(description, values)| {
                Attribute::with_values(*description, values.iter().copied())
            })
            .collect();
        self.state.lock().tree.insert(
            dn.normalized(),
            StoredEntry { dn, attributes },
        );
    }

    /// Seed a person entry with a `cn` matching its RDN value.
    pub fn add_person(&self, dn: &str) {
        let parsed = Dn::parse(dn).unwrap();
        let cn = parsed.rdn().unwrap().value().to_string();
        self.add(
            dn,
            &[("objectClass", &["top", "person"]), ("cn", &[cn.as_str()])],
        );
    }

    /// Seed an organizational unit.
    pub fn add_ou(&self, dn: &str) {
        let parsed = Dn::parse(dn).unwrap();
        let ou = parsed.rdn().unwrap().value().to_string();
        self.add(
            dn,
            &[
                ("objectClass", &["top", "organizationalUnit"]),
                ("ou", &[ou.as_str()]),
            ],
        );
    }

    /// Make rename of entries with children fail with a non-leaf error.
    pub fn refuse_non_leaf_rename(&self) {
        self.state.lock().refuse_non_leaf_rename = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn search_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Search { .. }))
            .count()
    }

    pub fn contains(&self, dn: &str) -> bool {
        let key = Dn::parse(dn).unwrap().normalized();
        self.state.lock().tree.contains_key(&key)
    }

    pub fn attributes_of(&self, dn: &str) -> Option<Attributes> {
        let key = Dn::parse(dn).unwrap().normalized();
        self.state
            .lock()
            .tree
            .get(&key)
            .map(|e| e.attributes.clone())
    }

    /// DNs currently stored at or below `dn`.
    pub fn subtree(&self, dn: &str) -> Vec<String> {
        let base = Dn::parse(dn).unwrap();
        self.state
            .lock()
            .tree
            .values()
            .filter(|e| e.dn.is_within(&base))
            .map(|e| e.dn.to_string())
            .collect()
    }

    fn has_children(state: &State, dn: &Dn) -> bool {
        state
            .tree
            .values()
            .any(|e| e.dn.parent().as_ref() == Some(dn))
    }
}

/// Minimal equality-filter matching: `(objectClass=*)`, `(attr=value)` and
/// disjunctions of those.
fn matches_filter(attributes: &Attributes, filter: &str) -> bool {
    if filter == FILTER_TRUE {
        return true;
    }
    let mut any = false;
    for part in filter.split('(').skip(1) {
        let Some((attr, rest)) = part.split_once('=') else {
            continue;
        };
        let value = rest.trim_end_matches([')', '|', '&']);
        if attr.is_empty() || attr == "|" || attr == "&" {
            continue;
        }
        any = true;
        let matched = if value == "*" {
            attributes.get(attr).is_some()
        } else {
            attributes.get(attr).is_some_and(|a| a.contains_text(value))
        };
        if matched {
            return true;
        }
    }
    !any
}

fn project(attributes: &Attributes, requested: &[String]) -> Attributes {
    if requested.iter().any(|a| a == NO_ATTRIBUTES) {
        return Attributes::new();
    }
    if requested.is_empty() {
        return attributes.clone();
    }
    let all_user = requested.iter().any(|a| a == ALL_USER_ATTRIBUTES);
    let all_operational = requested.iter().any(|a| a == ALL_OPERATIONAL_ATTRIBUTES);
    attributes
        .iter()
        .filter(|attr| {
            (all_user && !attr.is_operational())
                || (all_operational && attr.is_operational())
                || requested
                    .iter()
                    .any(|r| attr.is(r))
        })
        .cloned()
        .collect()
}

#[async_trait]
impl DirectoryTransport for FakeDirectory {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn search(
        &self,
        request: &SearchRequest,
        _monitor: &ProgressMonitor,
    ) -> std::result::Result<SearchResponse, DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Search {
            base: request.base.to_string(),
            scope: request.scope,
        });

        if !request.base.is_root() && !state.tree.contains_key(&request.base.normalized()) {
            return Err(DirectoryError::no_such_object(format!(
                "no such object: {}",
                request.base
            )));
        }

        let mut matches: Vec<(Dn, Attributes, bool)> = state
            .tree
            .values()
            .filter(|e| match request.scope {
                Scope::Object => e.dn == request.base,
                Scope::OneLevel => e.dn.parent().as_ref() == Some(&request.base),
                Scope::Subtree => e.dn.is_within(&request.base),
            })
            .filter(|e| matches_filter(&e.attributes, &request.filter))
            .map(|e| {
                let is_referral = e
                    .attributes
                    .get("objectClass")
                    .is_some_and(|oc| oc.contains_text("referral"));
                (e.dn.clone(), e.attributes.clone(), is_referral)
            })
            .collect();

        let mut response = SearchResponse::default();

        // client-requested size limit, when no paging drives the fetch
        let paged_request = request
            .controls
            .iter()
            .find_map(SearchControl::as_paged_results)
            .cloned();
        if paged_request.is_none()
            && request.size_limit > 0
            && matches.len() > request.size_limit as usize
        {
            matches.truncate(request.size_limit as usize);
            response.terminating_error = Some(DirectoryError::new(
                ErrorKind::SizeLimitExceeded,
                "size limit exceeded",
            ));
        }

        let to_items = |selected: Vec<(Dn, Attributes, bool)>| -> Vec<SearchItem> {
            selected
                .into_iter()
                .map(|(dn, attributes, is_referral)| {
                    let manual = request.referral_handling == ReferralHandling::Manual;
                    if manual && is_referral && dn != request.base {
                        let url = attributes
                            .get("ref")
                            .and_then(|r| r.text_values().next().map(str::to_string))
                            .unwrap_or_else(|| format!("ldap://elsewhere/{dn}"));
                        SearchItem::Continuation { url }
                    } else {
                        SearchItem::Object {
                            dn,
                            attributes: project(&attributes, &request.attributes),
                        }
                    }
                })
                .collect()
        };

        match paged_request {
            Some(paged) => {
                let mut remaining = if paged.has_cookie() {
                    let cookie = paged.cookie.clone().unwrap_or_default();
                    state.sessions.remove(&cookie).unwrap_or_default()
                } else {
                    matches
                        .into_iter()
                        .map(|(dn, attrs, _)| (dn, attrs))
                        .collect()
                };

                let take = (paged.size as usize).min(remaining.len());
                let page: Vec<(Dn, Attributes, bool)> = remaining
                    .drain(..take)
                    .map(|(dn, attrs)| {
                        let is_referral = attrs
                            .get("objectClass")
                            .is_some_and(|oc| oc.contains_text("referral"));
                        (dn, attrs, is_referral)
                    })
                    .collect();

                let cookie = if remaining.is_empty() {
                    None
                } else {
                    let cookie = state.next_cookie.to_be_bytes().to_vec();
                    state.next_cookie += 1;
                    state.sessions.insert(cookie.clone(), remaining);
                    Some(cookie)
                };
                response.controls.push(
                    PagedResults {
                        size: paged.size,
                        cookie,
                        critical: paged.critical,
                        scroll_mode: paged.scroll_mode,
                    }
                    .into(),
                );
                response.items = to_items(page);
            }
            None => {
                response.items = to_items(matches);
            }
        }

        Ok(response)
    }

    async fn create_entry(
        &self,
        dn: &Dn,
        attributes: &Attributes,
        _controls: &[Control],
        _monitor: &ProgressMonitor,
    ) -> std::result::Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Create { dn: dn.to_string() });

        if state.tree.contains_key(&dn.normalized()) {
            return Err(DirectoryError::already_exists(format!(
                "entry already exists: {dn}"
            )));
        }
        if let Some(parent) = dn.parent() {
            if !parent.is_root() && !state.tree.contains_key(&parent.normalized()) {
                return Err(DirectoryError::no_such_object(format!(
                    "parent does not exist: {parent}"
                )));
            }
        }
        state.tree.insert(
            dn.normalized(),
            StoredEntry {
                dn: dn.clone(),
                attributes: attributes.clone(),
            },
        );
        Ok(())
    }

    async fn modify_entry(
        &self,
        dn: &Dn,
        modifications: &[Modification],
        _controls: &[Control],
        _monitor: &ProgressMonitor,
    ) -> std::result::Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Modify { dn: dn.to_string() });

        let key = dn.normalized();
        let entry = state
            .tree
            .get_mut(&key)
            .ok_or_else(|| DirectoryError::no_such_object(format!("no such object: {dn}")))?;
        for modification in modifications {
            match modification.operation {
                ModifyOperation::Replace | ModifyOperation::Add => {
                    entry.attributes.put(modification.attribute.clone());
                }
                ModifyOperation::Remove => {
                    entry.attributes.remove(&modification.attribute.description);
                }
            }
        }
        Ok(())
    }

    async fn delete_entry(
        &self,
        dn: &Dn,
        _controls: &[Control],
        _monitor: &ProgressMonitor,
    ) -> std::result::Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete { dn: dn.to_string() });

        let key = dn.normalized();
        if !state.tree.contains_key(&key) {
            return Err(DirectoryError::no_such_object(format!(
                "no such object: {dn}"
            )));
        }
        if Self::has_children(&state, dn) {
            return Err(DirectoryError::not_allowed_on_non_leaf(format!(
                "entry has children: {dn}"
            )));
        }
        state.tree.remove(&key);
        Ok(())
    }

    async fn rename_entry(
        &self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        _controls: &[Control],
        _monitor: &ProgressMonitor,
    ) -> std::result::Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Rename {
            dn: dn.to_string(),
            new_rdn: new_rdn.to_string(),
        });

        if !state.tree.contains_key(&dn.normalized()) {
            return Err(DirectoryError::no_such_object(format!(
                "no such object: {dn}"
            )));
        }
        if state.refuse_non_leaf_rename && Self::has_children(&state, dn) {
            return Err(DirectoryError::not_allowed_on_non_leaf(format!(
                "subtree rename not supported: {dn}"
            )));
        }

        let parent = dn.parent().unwrap_or_else(Dn::root);
        let new_dn = parent.child(new_rdn.clone());
        if state.tree.contains_key(&new_dn.normalized()) {
            return Err(DirectoryError::already_exists(format!(
                "entry already exists: {new_dn}"
            )));
        }

        // move the whole subtree to the new path
        let moved: Vec<String> = state
            .tree
            .values()
            .filter(|e| e.dn.is_within(dn))
            .map(|e| e.dn.normalized())
            .collect();
        for key in moved {
            let entry = state.tree.remove(&key).expect("collected above");
            let rebased = entry.dn.rebase(dn, &new_dn).expect("is_within checked");
            let mut attributes = entry.attributes;
            if entry.dn == *dn {
                if delete_old_rdn {
                    if let Some(old_rdn) = dn.rdn() {
                        for ava in old_rdn.avas() {
                            attributes.remove_value(ava.attr_type(), ava.value());
                        }
                    }
                }
                for ava in new_rdn.avas() {
                    attributes.add_value(ava.attr_type(), ava.value());
                }
            }
            state.tree.insert(
                rebased.normalized(),
                StoredEntry {
                    dn: rebased,
                    attributes,
                },
            );
        }
        Ok(())
    }
}

/// A mirror over a fresh fake directory with the default schema most tests
/// want.
pub fn mirror_over(fake: std::sync::Arc<FakeDirectory>) -> DirectoryMirror {
    let schema = std::sync::Arc::new(StaticSchema::new(
        ["1.2.840.113556.1.4.319", "2.16.840.1.113730.3.4.2"],
        ["hasSubordinates"],
    ));
    DirectoryMirror::new(fake, schema, MirrorConfig::default())
}
