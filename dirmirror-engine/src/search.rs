//! The search and paging engine.
//!
//! One logical [`Search`] runs to completion over possibly several physical
//! round-trips (pages, referral hops). Each round-trip merges its items into
//! the entry cache; the search's hit list is swapped as a whole after every
//! round, so concurrent readers never observe a half-updated result array.

use async_trait::async_trait;
use dirmirror_core::controls::{PagedResults, SUBENTRIES_OID, SearchControl};
use dirmirror_core::dn::{Dn, normalize_str};
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_core::schema::{
    ALIAS_OC, HAS_SUBORDINATES_AT, NUM_SUBORDINATES_AT, OBJECT_CLASS_AT, REFERRAL_OC,
    SUBORDINATE_COUNT_AT, SchemaProvider,
};
use dirmirror_core::transport::{
    ALL_OPERATIONAL_ATTRIBUTES, ALL_USER_ATTRIBUTES, AliasDereference, Attributes,
    DirectoryTransport, FILTER_SUBENTRY, FILTER_TRUE, NO_ATTRIBUTES, ReferralHandling, Scope,
    SearchItem, SearchRequest,
};
use dirmirror_tree::cache::{EntryCache, ExistenceProbe};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Parameters of one logical search.
#[derive(Debug, Clone)]
pub struct SearchParameters {
    pub base: Dn,
    pub scope: Scope,
    pub filter: String,
    /// Requested attribute descriptions; `*`, `+` and `1.1` have their
    /// usual meanings, an empty list requests everything.
    pub attributes: Vec<String>,
    /// Logical result limit across all pages; 0 means unlimited.
    pub count_limit: u32,
    /// Seconds; 0 means no client-requested limit.
    pub time_limit: u32,
    pub alias_dereference: AliasDereference,
    pub referral_handling: ReferralHandling,
    pub controls: Vec<SearchControl>,
    /// Request the best advertised child-existence hint attribute and
    /// interpret it.
    pub init_children_hint: bool,
}

impl SearchParameters {
    pub fn new(base: Dn, scope: Scope, filter: impl Into<String>) -> Self {
        Self {
            base,
            scope,
            filter: filter.into(),
            attributes: vec![ALL_USER_ATTRIBUTES.to_string()],
            count_limit: 0,
            time_limit: 0,
            alias_dereference: AliasDereference::Never,
            referral_handling: ReferralHandling::Ignore,
            controls: Vec::new(),
            init_children_hint: false,
        }
    }

    /// The paged-results request control, if attached.
    pub fn paged_results(&self) -> Option<&PagedResults> {
        self.controls.iter().find_map(SearchControl::as_paged_results)
    }

    fn requests(&self, description: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| normalize_str(a) == normalize_str(description))
    }

    fn has_subentries_control(&self) -> bool {
        self.controls
            .iter()
            .any(|c| normalize_str(c.oid()) == normalize_str(SUBENTRIES_OID))
    }

    /// Same parameters with the paged-results cookie replaced.
    fn with_cookie(&self, cookie: Option<Vec<u8>>) -> Self {
        let mut params = self.clone();
        for control in &mut params.controls {
            if let SearchControl::PagedResults(paged) = control {
                paged.cookie = cookie.clone();
            }
        }
        params
    }
}

/// One resolved result of a search, pointing at a cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub dn: Dn,
}

/// An unresolved referral redirect returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchContinuation {
    pub url: String,
}

#[derive(Debug, Default)]
struct SearchState {
    hits: Arc<[SearchHit]>,
    continuations: Vec<SearchContinuation>,
    response_controls: Vec<SearchControl>,
    count_limit_exceeded: bool,
    next_page: Option<SearchParameters>,
    top_page: Option<SearchParameters>,
}

/// One logical query plus its mutable result state.
///
/// A search may be re-executed transparently several times (one per page or
/// referral hop) while keeping its identity; observers always see either the
/// previous or the fully merged hit list, never a partial one.
pub struct Search {
    id: Uuid,
    name: String,
    params: SearchParameters,
    state: RwLock<SearchState>,
}

impl Search {
    pub fn new(name: impl Into<String>, params: SearchParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            params,
            state: RwLock::new(SearchState::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &SearchParameters {
        &self.params
    }

    /// Snapshot of the merged hits.
    pub fn hits(&self) -> Arc<[SearchHit]> {
        Arc::clone(&self.state.read().hits)
    }

    pub fn continuations(&self) -> Vec<SearchContinuation> {
        self.state.read().continuations.clone()
    }

    pub fn response_controls(&self) -> Vec<SearchControl> {
        self.state.read().response_controls.clone()
    }

    pub fn count_limit_exceeded(&self) -> bool {
        self.state.read().count_limit_exceeded
    }

    /// Parameters fetching the next page, present in scroll mode when the
    /// server returned a continuation cookie.
    pub fn next_page_parameters(&self) -> Option<SearchParameters> {
        self.state.read().next_page.clone()
    }

    /// Parameters re-fetching the first page, present in scroll mode when
    /// this execution was itself a continuation.
    pub fn top_page_parameters(&self) -> Option<SearchParameters> {
        self.state.read().top_page.clone()
    }

    /// Drop all result state before a fresh execution.
    pub fn reset_results(&self) {
        let mut state = self.state.write();
        *state = SearchState::default();
    }

    /// Remove hits at or below `dn`; returns how many were dropped.
    pub fn remove_hits_within(&self, dn: &Dn) -> usize {
        let mut state = self.state.write();
        let before = state.hits.len();
        if before == 0 {
            return 0;
        }
        let kept: Vec<SearchHit> = state
            .hits
            .iter()
            .filter(|hit| !hit.dn.is_within(dn))
            .cloned()
            .collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            state.hits = kept.into();
        }
        dropped
    }

    pub(crate) fn set_hits(&self, hits: Vec<SearchHit>) {
        self.state.write().hits = hits.into();
    }
}

/// Executes logical searches and keeps the entry cache in sync with what
/// the server returned.
pub struct SearchEngine {
    transport: Arc<dyn DirectoryTransport>,
    schema: Arc<dyn SchemaProvider>,
    cache: Arc<EntryCache>,
}

impl SearchEngine {
    pub fn new(
        transport: Arc<dyn DirectoryTransport>,
        schema: Arc<dyn SchemaProvider>,
        cache: Arc<EntryCache>,
    ) -> Self {
        Self {
            transport,
            schema,
            cache,
        }
    }

    pub fn transport(&self) -> &Arc<dyn DirectoryTransport> {
        &self.transport
    }

    pub fn cache(&self) -> &Arc<EntryCache> {
        &self.cache
    }

    /// Run one logical search to completion.
    ///
    /// Cancellation is polled before each round-trip; a canceled search
    /// keeps the results merged so far and records no error for the
    /// cancellation itself.
    pub async fn execute(&self, search: &Search, monitor: &ProgressMonitor) {
        search.reset_results();

        let mut merged: Vec<SearchHit> = Vec::new();
        let mut continuations: Vec<SearchContinuation> = Vec::new();
        let mut to_perform = Some(search.parameters().clone());

        while let Some(params) = to_perform.take() {
            if monitor.is_canceled() {
                break;
            }

            let round = self.round_trip(&params, monitor).await;
            merged.extend(round.hits);
            continuations.extend(round.continuations);

            {
                let mut state = search.state.write();
                state.hits = merged.clone().into();
                state.continuations = continuations.clone();
                state.response_controls = round.response_controls.clone();
                state.count_limit_exceeded |= round.limit_exceeded;
            }

            // paging: follow the cookie, either transparently or by exposing
            // follow-up searches in scroll mode
            let request_paged = params.paged_results().cloned();
            let response_paged = round
                .response_controls
                .iter()
                .find_map(SearchControl::as_paged_results)
                .cloned();
            if let (Some(request), Some(response)) = (request_paged, response_paged) {
                // a pending cookie means the logical result set goes on
                search.state.write().count_limit_exceeded = response.has_cookie();
                if request.scroll_mode {
                    let mut state = search.state.write();
                    if request.has_cookie() {
                        state.top_page = Some(search.parameters().with_cookie(None));
                    }
                    if response.has_cookie() {
                        state.next_page = Some(params.with_cookie(response.cookie.clone()));
                    }
                } else if response.has_cookie()
                    && (params.count_limit == 0 || (merged.len() as u32) < params.count_limit)
                {
                    to_perform = Some(params.with_cookie(response.cookie.clone()));
                }
            }
        }

        debug!(
            search = %search.name(),
            hits = merged.len(),
            continuations = continuations.len(),
            "search completed"
        );
    }

    async fn round_trip(&self, params: &SearchParameters, monitor: &ProgressMonitor) -> Round {
        let request = self.prepare_request(params);
        let mut round = Round::default();

        let response = match self.transport.search(&request, monitor).await {
            Ok(response) => response,
            Err(error) => {
                if error.kind.is_limit() || error.kind == dirmirror_core::ErrorKind::NoSuchObject {
                    round.limit_exceeded = true;
                } else {
                    monitor.report_directory_error(error);
                }
                return round;
            }
        };

        for item in &response.items {
            if monitor.is_canceled() {
                break;
            }
            match item {
                SearchItem::Object { dn, attributes } => {
                    if self.merge_object(dn, attributes, params, monitor).await {
                        round.hits.push(SearchHit { dn: dn.clone() });
                    }
                }
                SearchItem::Continuation { url } => {
                    round.continuations.push(SearchContinuation { url: url.clone() });
                }
            }
        }

        if let Some(error) = response.terminating_error {
            if error.kind.is_limit() || error.kind == dirmirror_core::ErrorKind::NoSuchObject {
                round.limit_exceeded = true;
            } else {
                monitor.report_directory_error(error);
            }
        }

        round.response_controls = response.controls;
        round
    }

    /// Materialize/update the cache entry for one returned object. Returns
    /// false when the entry could not be placed in the cache.
    async fn merge_object(
        &self,
        dn: &Dn,
        attributes: &Attributes,
        params: &SearchParameters,
        monitor: &ProgressMonitor,
    ) -> bool {
        if !self.cache.contains(dn) && !self.cache.materialize(dn, self, monitor).await {
            debug!(dn = %dn, "dropping result that could not be cached");
            return false;
        }

        self.cache.with_entry_mut(dn, |entry| {
            init_flags(entry, attributes, params);
            refill_attributes(entry, attributes, &params.attributes);
        });
        true
    }

    fn prepare_request(&self, params: &SearchParameters) -> SearchRequest {
        let mut attributes = params.attributes.clone();

        // child-existence hint, using the best attribute this server
        // advertises
        if params.init_children_hint {
            if let Some(hint) = self.schema.children_hint_attribute() {
                if !params.requests(hint) {
                    attributes.push(hint.to_string());
                }
            }
        }

        // the object class is always needed to classify alias, referral and
        // subentry results
        if !params.requests(OBJECT_CLASS_AT) && !params.requests(ALL_USER_ATTRIBUTES) {
            attributes.push(OBJECT_CLASS_AT.to_string());
        }

        // degrade controls the server does not advertise
        let supported = self.schema.supported_controls();
        let controls: Vec<SearchControl> = params
            .controls
            .iter()
            .filter(|control| {
                let oid = normalize_str(control.oid());
                supported.iter().any(|s| normalize_str(s) == oid)
            })
            .cloned()
            .collect();

        SearchRequest {
            base: params.base.clone(),
            scope: params.scope,
            filter: params.filter.clone(),
            attributes,
            size_limit: params.count_limit,
            time_limit: params.time_limit,
            alias_dereference: params.alias_dereference,
            referral_handling: params.referral_handling,
            controls,
        }
    }
}

#[derive(Default)]
struct Round {
    hits: Vec<SearchHit>,
    continuations: Vec<SearchContinuation>,
    response_controls: Vec<SearchControl>,
    limit_exceeded: bool,
}

#[async_trait]
impl ExistenceProbe for SearchEngine {
    /// One-object existence probe used while materializing naming contexts.
    async fn exists(&self, dn: &Dn, monitor: &ProgressMonitor) -> bool {
        let probe_monitor = monitor.fork();
        let request = SearchRequest {
            base: dn.clone(),
            scope: Scope::Object,
            filter: FILTER_TRUE.to_string(),
            attributes: vec![NO_ATTRIBUTES.to_string()],
            size_limit: 1,
            time_limit: 0,
            alias_dereference: AliasDereference::Never,
            referral_handling: ReferralHandling::Ignore,
            controls: Vec::new(),
        };
        match self.transport.search(&request, &probe_monitor).await {
            Ok(response) => response
                .items
                .iter()
                .any(|item| matches!(item, SearchItem::Object { .. })),
            Err(_) => false,
        }
    }
}

/// Classify alias/referral/subentry flags and the child-existence hint from
/// a returned attribute snapshot.
fn init_flags(entry: &mut dirmirror_tree::Entry, attributes: &Attributes, params: &SearchParameters) {
    if let Some(object_class) = attributes.get(OBJECT_CLASS_AT) {
        for value in object_class.text_values() {
            let value = normalize_str(value);
            if value == normalize_str(ALIAS_OC) {
                entry.is_alias = true;
                entry.has_children_hint = false;
            }
            if value == normalize_str(REFERRAL_OC) {
                entry.is_referral = true;
                entry.has_children_hint = false;
            }
        }
    }

    if params.init_children_hint {
        if let Some(attr) = attributes.get(HAS_SUBORDINATES_AT) {
            if attr.contains_text("FALSE") {
                entry.has_children_hint = false;
            }
        }
        if let Some(attr) = attributes.get(NUM_SUBORDINATES_AT) {
            if attr.contains_text("0") {
                entry.has_children_hint = false;
            }
        }
        if let Some(attr) = attributes.get(SUBORDINATE_COUNT_AT) {
            if attr.contains_text("0") {
                entry.has_children_hint = false;
            }
        }
    }

    if params.has_subentries_control()
        || normalize_str(&params.filter) == normalize_str(FILTER_SUBENTRY)
    {
        entry.is_subentry = true;
        entry.has_children_hint = false;
    }
}

/// Replace the entry's attribute snapshot with the returned one, honoring
/// the requested-attribute list: only the requested classes of attributes
/// are cleared before the refill.
fn refill_attributes(entry: &mut dirmirror_tree::Entry, returned: &Attributes, requested: &[String]) {
    let requested_no_attributes = requested
        .iter()
        .any(|a| normalize_str(a) == NO_ATTRIBUTES);
    if requested_no_attributes {
        return;
    }

    let all = requested.is_empty();
    let all_user = all
        || requested
            .iter()
            .any(|a| normalize_str(a) == ALL_USER_ATTRIBUTES);
    let all_operational = all
        || requested
            .iter()
            .any(|a| normalize_str(a) == ALL_OPERATIONAL_ATTRIBUTES);

    // clear what was requested from the server
    let stale: Vec<String> = entry
        .attributes
        .iter()
        .filter(|attr| {
            (all_user && !attr.is_operational())
                || (all_operational && attr.is_operational())
                || requested
                    .iter()
                    .any(|r| normalize_str(r) == normalize_str(&attr.description))
        })
        .map(|attr| attr.description.clone())
        .collect();
    for description in stale {
        entry.attributes.remove(&description);
    }

    // anything the server actually returned replaces the old value set
    for attr in returned.iter() {
        if !attr.values.is_empty() {
            entry.attributes.put(attr.clone());
        }
    }

    if all_user {
        entry.attributes_initialized = true;
    }
    entry.updated_at = chrono::Utc::now();
}
