//! Optimistic mutations against the persistence service.
//!
//! Each mutation is applied to the local [`RecordStore`] right away, sent to the
//! service, then either reconciled with the service's answer or rolled back.
//! Mutations to one day carry increasing sequence numbers; the local view is
//! always the last reconciled server state with the still-pending mutations
//! replayed on top in issue order, so responses that arrive late never undo a
//! newer mutation.

use crate::date_key::DateKey;
use crate::errors::{TrackerError, TransportError};
use crate::models::{DatedRecord, Fields, Mutation, SubItem};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The remote side of a tracked domain.
pub trait Persistence {
    /// `Ok(None)` when the service has no record for `key`.
    fn fetch(&self, key: DateKey) -> impl Future<Output = Result<Option<DatedRecord>, TransportError>> + Send;

    /// Newest first.
    fn list(&self, limit: usize) -> impl Future<Output = Result<Vec<DatedRecord>, TransportError>> + Send;

    /// `Ok(None)` when the service answers without a body (deletes).
    fn send(
        &self,
        key: DateKey,
        mutation: &Mutation,
    ) -> impl Future<Output = Result<Option<DatedRecord>, TransportError>> + Send;
}

/// Lifecycle of one mutation. `Committed` and `RolledBack` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Committed,
    RolledBack,
}

struct KeyState {
    next_seq: u64,
    /// Highest sequence whose response was reconciled; 0 before any.
    reconciled_seq: u64,
    /// Sequences at or below this were cancelled.
    cancelled_through: u64,
    /// Last state confirmed by the service.
    base: Option<DatedRecord>,
    pending: BTreeMap<u64, (Mutation, DateTime<Utc>)>,
    in_flight: BTreeSet<u64>,
    cancel: CancellationToken,
}

impl KeyState {
    fn new(base: Option<DatedRecord>) -> Self {
        Self {
            next_seq: 1,
            reconciled_seq: 0,
            cancelled_through: 0,
            base,
            pending: BTreeMap::new(),
            in_flight: BTreeSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Confirmed state with every pending mutation replayed in issue order.
    /// A pending mutation that no longer applies (its item is gone) is skipped.
    fn view(&self, key: DateKey) -> Option<DatedRecord> {
        self.pending
            .values()
            .fold(self.base.clone(), |current, (mutation, at)| {
                match mutation.apply_to(key, current.clone(), *at) {
                    Ok(next) => next,
                    Err(_) => current,
                }
            })
    }
}

#[derive(Default)]
struct Inner {
    store: RecordStore,
    keys: HashMap<DateKey, KeyState>,
}

impl Inner {
    fn refresh(&mut self, key: DateKey) {
        if let Some(state) = self.keys.get(&key) {
            self.store.replace(key, state.view(key));
        }
    }

    fn release_if_idle(&mut self, key: DateKey) {
        if self.keys.get(&key).is_some_and(|state| state.in_flight.is_empty()) {
            self.keys.remove(&key);
        }
    }

    /// Drops one mutation's optimistic effect; later pending mutations are replayed.
    fn forget(&mut self, key: DateKey, seq: u64) {
        if let Some(state) = self.keys.get_mut(&key) {
            state.in_flight.remove(&seq);
            state.pending.remove(&seq);
            self.refresh(key);
            self.release_if_idle(key);
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One in-flight mutation. Dropping it while still pending rolls it back,
/// so an abandoned `mutate` future never leaves its optimistic effect behind.
struct Ticket<'a> {
    inner: &'a Mutex<Inner>,
    key: DateKey,
    seq: u64,
    cancel: CancellationToken,
    state: MutationState,
}

impl Ticket<'_> {
    fn finish(&mut self, state: MutationState) {
        debug_assert_eq!(self.state, MutationState::Pending, "mutation already resolved");
        self.state = state;
        debug!(key = %self.key, seq = self.seq, ?state, "mutation resolved");
    }

    fn commit(&mut self, mutation: &Mutation, body: Option<DatedRecord>) -> Result<DatedRecord, TrackerError> {
        let key = self.key;
        let seq = self.seq;
        let mut inner = lock(self.inner);
        let Some(state) = inner.keys.get_mut(&key) else {
            self.finish(MutationState::Committed);
            return Ok(inner.store.get(&key));
        };
        state.in_flight.remove(&seq);

        if seq <= state.cancelled_through {
            inner.release_if_idle(key);
            self.finish(MutationState::RolledBack);
            return Err(TrackerError::Cancelled(key));
        }

        if seq < state.reconciled_seq {
            // A newer mutation already reconciled; its server state includes or supersedes this one.
            state.pending.remove(&seq);
            debug!("{}", TrackerError::StaleResponse { key, seq });
        } else {
            let confirmed = match body {
                Some(record) => Some(record),
                None => mutation
                    .apply_to(key, state.base.clone(), Utc::now())
                    .unwrap_or_else(|_| state.base.clone()),
            };
            state.base = confirmed;
            state.reconciled_seq = seq;
            state.pending.retain(|pending_seq, _| *pending_seq > seq);
        }

        inner.refresh(key);
        inner.release_if_idle(key);
        self.finish(MutationState::Committed);
        Ok(inner.store.get(&key))
    }

    fn roll_back(&mut self) {
        lock(self.inner).forget(self.key, self.seq);
        warn!(key = %self.key, seq = self.seq, "mutation failed, rolled back");
        self.finish(MutationState::RolledBack);
    }

    fn finish_cancelled(&mut self) {
        let mut inner = lock(self.inner);
        if let Some(state) = inner.keys.get_mut(&self.key) {
            state.in_flight.remove(&self.seq);
        }
        inner.release_if_idle(self.key);
        drop(inner);
        self.finish(MutationState::RolledBack);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.state != MutationState::Pending {
            return;
        }
        lock(self.inner).forget(self.key, self.seq);
        self.state = MutationState::RolledBack;
        debug!(key = %self.key, seq = self.seq, "abandoned mutation rolled back");
    }
}

pub struct SyncCoordinator<P> {
    persistence: P,
    inner: Mutex<Inner>,
}

impl<P: Persistence> SyncCoordinator<P> {
    pub fn new(persistence: P) -> Self {
        Self::with_store(persistence, RecordStore::new())
    }

    pub fn with_store(persistence: P, store: RecordStore) -> Self {
        Self {
            persistence,
            inner: Mutex::new(Inner {
                store,
                keys: HashMap::new(),
            }),
        }
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Current local view of one day; empty when nothing is known.
    pub fn record(&self, key: DateKey) -> DatedRecord {
        lock(&self.inner).store.get(&key)
    }

    pub fn snapshot(&self) -> RecordStore {
        lock(&self.inner).store.clone()
    }

    /// Runs `f` against the local store, e.g. to compute rollups.
    pub fn with_store_ref<R>(&self, f: impl FnOnce(&RecordStore) -> R) -> R {
        f(&lock(&self.inner).store)
    }

    /// Mutations for `key` still waiting on the service.
    pub fn in_flight(&self, key: DateKey) -> usize {
        lock(&self.inner)
            .keys
            .get(&key)
            .map_or(0, |state| state.in_flight.len())
    }

    /// Reads one day from the service. A 404 is not an error: the day reads as empty.
    pub async fn load(&self, key: DateKey) -> Result<DatedRecord, TrackerError> {
        let fetched = match self.persistence.fetch(key).await {
            Ok(record) => record,
            Err(TransportError::NotFound) => None,
            Err(err) => return Err(TrackerError::FetchFailed(err)),
        };
        if fetched.is_none() {
            debug!("{}", TrackerError::RecordNotFound(key));
        }

        let mut inner = lock(&self.inner);
        match inner.keys.get_mut(&key) {
            Some(state) => {
                state.base = fetched;
                inner.refresh(key);
            }
            None => inner.store.replace(key, fetched),
        }
        Ok(inner.store.get(&key))
    }

    /// Loads the newest `limit` days into the local store.
    pub async fn load_latest(&self, limit: usize) -> Result<Vec<DatedRecord>, TrackerError> {
        let records = self.persistence.list(limit).await?;
        let mut inner = lock(&self.inner);
        for record in &records {
            let key = record.date;
            match inner.keys.get_mut(&key) {
                Some(state) => {
                    state.base = Some(record.clone());
                    inner.refresh(key);
                }
                None => inner.store.replace(key, Some(record.clone())),
            }
        }
        Ok(records)
    }

    pub async fn save_fields(&self, key: DateKey, fields: Fields) -> Result<DatedRecord, TrackerError> {
        self.mutate(key, Mutation::SaveFields(fields)).await
    }

    pub async fn save_record(&self, record: DatedRecord) -> Result<DatedRecord, TrackerError> {
        self.mutate(record.date, Mutation::SaveRecord(record)).await
    }

    pub async fn add_item(&self, key: DateKey, item: SubItem) -> Result<DatedRecord, TrackerError> {
        self.mutate(key, Mutation::AddItem(item)).await
    }

    pub async fn toggle_item(&self, key: DateKey, item_id: impl Into<String>) -> Result<DatedRecord, TrackerError> {
        self.mutate(key, Mutation::ToggleItem(item_id.into())).await
    }

    pub async fn remove_item(&self, key: DateKey, item_id: impl Into<String>) -> Result<DatedRecord, TrackerError> {
        self.mutate(key, Mutation::RemoveItem(item_id.into())).await
    }

    pub async fn delete_record(&self, key: DateKey) -> Result<DatedRecord, TrackerError> {
        self.mutate(key, Mutation::DeleteRecord).await
    }

    /// Applies `mutation` locally, sends it, then reconciles or rolls back.
    /// Returns the local view of the day once this mutation has resolved.
    /// Dropping the future before it resolves rolls the mutation back.
    pub async fn mutate(&self, key: DateKey, mutation: Mutation) -> Result<DatedRecord, TrackerError> {
        let mut ticket = self.begin(key, &mutation)?;

        let response = tokio::select! {
            result = self.persistence.send(key, &mutation) => Some(result),
            _ = ticket.cancel.cancelled() => None,
        };

        match response {
            Some(Ok(body)) => ticket.commit(&mutation, body),
            Some(Err(err)) => {
                ticket.roll_back();
                Err(TrackerError::SyncFailed { key, source: err })
            }
            None => {
                ticket.finish_cancelled();
                Err(TrackerError::Cancelled(key))
            }
        }
    }

    /// Aborts every in-flight mutation for `key` and restores the last confirmed
    /// state. Returns how many mutations were cancelled.
    pub fn cancel(&self, key: DateKey) -> usize {
        let mut inner = lock(&self.inner);
        let Some(state) = inner.keys.get_mut(&key) else {
            return 0;
        };
        let cancelled = state.in_flight.len();
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.cancelled_through = state.next_seq - 1;
        state.pending.clear();
        inner.refresh(key);
        debug!(%key, cancelled, "cancelled pending mutations");
        cancelled
    }

    fn begin(&self, key: DateKey, mutation: &Mutation) -> Result<Ticket<'_>, TrackerError> {
        let mut inner = lock(&self.inner);
        let now = Utc::now();
        let current = inner.store.get_existing(&key).cloned();
        let optimistic = mutation.apply_to(key, current.clone(), now)?;

        let state = inner
            .keys
            .entry(key)
            .or_insert_with(|| KeyState::new(current));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(seq, (mutation.clone(), now));
        state.in_flight.insert(seq);
        let cancel = state.cancel.clone();

        inner.store.replace(key, optimistic);
        debug!(%key, seq, mutation = mutation.name(), "applied optimistically");

        Ok(Ticket {
            inner: &self.inner,
            key,
            seq,
            cancel,
            state: MutationState::Pending,
        })
    }
}
