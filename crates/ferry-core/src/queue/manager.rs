//! QueueManager: the in-memory queue over a snapshot store.
//!
//! Design:
//! - One coarse `std::sync::Mutex` guards every item. Stats and next-item
//!   selection need a consistent view of the whole set, and no critical section
//!   ever awaits or does I/O, so `enqueue` stays synchronous.
//! - Every mutation bumps `revision`. A flush copies the items at some
//!   revision, writes them outside the lock, then records that revision as
//!   persisted. Flushes are serialized so an older copy never lands last.
//! - A background maintenance task flushes on a fixed interval and runs
//!   retention cleanup. `shutdown()` stops it and forces a final flush.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{QueueStore, RetryPolicy, StoreLock};
use crate::config::QueueConfig;
use crate::domain::{
    ItemEvent, ItemEventKind, ItemId, ItemIdGenerator, ItemStatus, OwnerMetadata, QueueItem,
    QueueStats,
};
use crate::error::{QueueError, StoreError};
use crate::ports::Clock;

const EVENT_CAPACITY: usize = 256;

/// Listing filter for `get_items`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    /// Matches `OwnerMetadata::id`.
    pub owner: Option<String>,
    pub limit: Option<usize>,
}

impl ItemFilter {
    fn matches(&self, item: &QueueItem) -> bool {
        self.status.is_none_or(|status| item.status == status)
            && self.owner.as_deref().is_none_or(|owner| item.owner.id == owner)
    }
}

/// Cadence of the background maintenance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub flush_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: u32,
}

impl From<&QueueConfig> for MaintenanceSchedule {
    fn from(config: &QueueConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            cleanup_interval: config.cleanup_interval(),
            retention_days: config.retention_days,
        }
    }
}

struct QueueState {
    items: HashMap<ItemId, QueueItem>,
    ids: ItemIdGenerator,
    revision: u64,
    persisted_revision: u64,
}

impl QueueState {
    fn touch(&mut self) {
        self.revision += 1;
    }

    fn is_dirty(&self) -> bool {
        self.revision != self.persisted_revision
    }
}

struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct QueueManager {
    state: Mutex<QueueState>,
    store: QueueStore,
    _store_lock: StoreLock,
    /// Serializes snapshot writes.
    save_lock: Mutex<()>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ItemEvent>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl QueueManager {
    /// Lock and load the snapshot behind `store` and build a manager over it.
    ///
    /// Fails with `StoreError::Locked` if another manager owns the snapshot;
    /// two writers would overwrite each other's flushes.
    ///
    /// Items found in `Processing` were interrupted by an unclean stop and are
    /// put back to `Pending`; the manager starts dirty in that case so the
    /// repaired state is written on the next flush.
    pub fn open(
        store: QueueStore,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let lock = store.lock()?;
        let loaded = store.load();

        let mut items = HashMap::with_capacity(loaded.len());
        let mut recovered = 0usize;
        for mut item in loaded {
            if item.recover_interrupted() {
                recovered += 1;
            }
            if let Some(previous) = items.insert(item.id, item) {
                warn!(item_id = %previous.id, "duplicate id in snapshot, keeping the later entry");
            }
        }

        let floor = items.keys().max().copied();
        let mut state = QueueState {
            items,
            ids: ItemIdGenerator::starting_after(floor),
            revision: 0,
            persisted_revision: 0,
        };
        if recovered > 0 {
            warn!(recovered, "requeued items interrupted mid-delivery");
            state.touch();
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            state: Mutex::new(state),
            store,
            _store_lock: lock,
            save_lock: Mutex::new(()),
            policy,
            clock,
            events,
            maintenance: Mutex::new(None),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Receive an event for every enqueue, transition and removal.
    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // producer side
    // ------------------------------------------------------------------

    /// Add an artifact. Never blocks on I/O; duplicates are allowed.
    pub fn enqueue(&self, artifact_path: impl Into<PathBuf>, owner: OwnerMetadata) -> ItemId {
        let now = self.clock.now();
        let item = {
            let mut state = self.lock_state();
            let id = state.ids.next_id(now);
            let item = QueueItem::new(id, artifact_path, owner, now);
            state.items.insert(id, item.clone());
            state.touch();
            item
        };

        debug!(item_id = %item.id, path = %item.artifact_path.display(), owner = %item.owner.id, "enqueued");
        self.emit(ItemEvent::from_item(ItemEventKind::Enqueued, &item, now));
        item.id
    }

    // ------------------------------------------------------------------
    // processor side
    // ------------------------------------------------------------------

    /// Oldest eligible item (Pending, or Failed past its backoff).
    ///
    /// Ties on `enqueued_at` go to the smaller id, i.e. the earlier enqueue.
    pub fn get_next_pending(&self) -> Option<QueueItem> {
        let now = self.clock.now();
        let state = self.lock_state();
        state
            .items
            .values()
            .filter(|item| item.is_eligible(now))
            .min_by_key(|item| (item.enqueued_at, item.id))
            .cloned()
    }

    pub fn mark_processing(&self, id: &ItemId) -> Result<QueueItem, QueueError> {
        self.transition(id, |item, now| item.start_attempt(now))
            .inspect_err(|e| warn!(item_id = %id, error = %e, "mark_processing ignored"))
    }

    pub fn mark_success(&self, id: &ItemId) -> Result<QueueItem, QueueError> {
        self.transition(id, |item, now| item.mark_sent(now))
            .inspect(|item| info!(item_id = %item.id, retry_count = item.retry_count, "delivered"))
            .inspect_err(|e| warn!(item_id = %id, error = %e, "mark_success ignored"))
    }

    pub fn mark_failed(
        &self,
        id: &ItemId,
        error: impl Into<String>,
    ) -> Result<QueueItem, QueueError> {
        let error = error.into();
        let policy = &self.policy;
        let result = self.transition(id, |item, now| item.record_failure(now, error, policy));

        match &result {
            Ok(item) if item.status == ItemStatus::PermanentlyFailed => error!(
                item_id = %item.id,
                retry_count = item.retry_count,
                error = item.last_error.as_deref().unwrap_or_default(),
                "delivery permanently failed"
            ),
            Ok(item) => warn!(
                item_id = %item.id,
                retry_count = item.retry_count,
                next_retry_at = ?item.next_retry_at,
                error = item.last_error.as_deref().unwrap_or_default(),
                "delivery failed, retry scheduled"
            ),
            Err(e) => warn!(item_id = %id, error = %e, "mark_failed ignored"),
        }
        result
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    pub fn get_stats(&self) -> QueueStats {
        let state = self.lock_state();
        state.items.values().map(|item| item.status).collect()
    }

    pub fn get_item(&self, id: &ItemId) -> Option<QueueItem> {
        self.lock_state().items.get(id).cloned()
    }

    /// Every item, most recently enqueued first.
    pub fn get_all_items(&self) -> Vec<QueueItem> {
        self.get_items(&ItemFilter::default())
    }

    /// Matching items, most recently enqueued first, truncated to `limit`.
    pub fn get_items(&self, filter: &ItemFilter) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = {
            let state = self.lock_state();
            state
                .items
                .values()
                .filter(|item| filter.matches(item))
                .cloned()
                .collect()
        };
        items.sort_by(|a, b| {
            b.enqueued_at
                .cmp(&a.enqueued_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }
        items
    }

    // ------------------------------------------------------------------
    // retention and manual purge
    // ------------------------------------------------------------------

    /// Remove Sent items completed more than `retention_days` ago.
    ///
    /// Failed and PermanentlyFailed items are never removed here.
    pub fn cleanup_old_items(&self, retention_days: u32) -> usize {
        let now = self.clock.now();
        let Some(threshold) = now.checked_sub_signed(TimeDelta::days(i64::from(retention_days)))
        else {
            return 0;
        };

        let removed = self.remove_where(now, |item| item.is_sent_before(threshold));
        if removed > 0 {
            info!(removed, retention_days, "purged delivered items past retention");
        }
        removed
    }

    /// Remove one item the processor is done with (Sent, Failed or
    /// PermanentlyFailed).
    pub fn purge_item(&self, id: &ItemId) -> Result<QueueItem, QueueError> {
        let now = self.clock.now();
        let removed = {
            let mut state = self.lock_state();
            let item = state.items.get(id).ok_or(QueueError::ItemNotFound(*id))?;
            item.ensure_purgeable()?;
            let removed = state.items.remove(id);
            state.touch();
            removed
        }
        .ok_or(QueueError::ItemNotFound(*id))?;

        info!(item_id = %removed.id, status = %removed.status, "item purged");
        self.emit(ItemEvent::from_item(ItemEventKind::Removed, &removed, now));
        Ok(removed)
    }

    /// Remove every PermanentlyFailed item. Returns how many were removed.
    pub fn purge_permanently_failed(&self) -> usize {
        let now = self.clock.now();
        let removed =
            self.remove_where(now, |item| item.status == ItemStatus::PermanentlyFailed);
        if removed > 0 {
            info!(removed, "purged permanently failed items");
        }
        removed
    }

    // ------------------------------------------------------------------
    // persistence
    // ------------------------------------------------------------------

    /// Whether there are mutations not yet written to the snapshot.
    pub fn is_dirty(&self) -> bool {
        self.lock_state().is_dirty()
    }

    /// Write the snapshot if dirty. Blocking; returns whether a write happened.
    ///
    /// On failure the manager stays dirty and the next flush retries.
    pub fn flush(&self) -> Result<bool, StoreError> {
        let _serialized = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut items, revision) = {
            let state = self.lock_state();
            if !state.is_dirty() {
                return Ok(false);
            }
            let items: Vec<QueueItem> = state.items.values().cloned().collect();
            (items, state.revision)
        };
        items.sort_by_key(|item| (item.enqueued_at, item.id));

        self.store.save(&items)?;

        let mut state = self.lock_state();
        state.persisted_revision = state.persisted_revision.max(revision);
        Ok(true)
    }

    /// Spawn the flush/cleanup task. Must be called inside a tokio runtime.
    ///
    /// A second call while the task is running is ignored.
    pub fn start_maintenance(self: &Arc<Self>, schedule: MaintenanceSchedule) {
        let mut slot = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("maintenance task already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let join = tokio::spawn(async move {
            let mut flush_tick = tokio::time::interval(schedule.flush_interval);
            flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cleanup_tick = tokio::time::interval(schedule.cleanup_interval);
            cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // also fires if the sender is dropped
                    _ = shutdown_rx.changed() => break,
                    _ = flush_tick.tick() => manager.flush_in_background().await,
                    _ = cleanup_tick.tick() => {
                        manager.cleanup_old_items(schedule.retention_days);
                    }
                }
            }
            debug!("maintenance task stopped");
        });

        info!(
            flush_interval_ms = schedule.flush_interval.as_millis() as u64,
            cleanup_interval_ms = schedule.cleanup_interval.as_millis() as u64,
            "maintenance task started"
        );
        *slot = Some(MaintenanceHandle { shutdown_tx, join });
    }

    /// Stop the maintenance task and write a final snapshot.
    pub async fn shutdown(self: &Arc<Self>) -> Result<(), QueueError> {
        let handle = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // ignore send error: the task may already be gone
            let _ = handle.shutdown_tx.send(true);
            if let Err(e) = handle.join.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }

        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.flush())
            .await
            .map_err(|e| QueueError::Background(e.to_string()))??;

        info!(path = %self.store.path().display(), "queue manager stopped, snapshot flushed");
        Ok(())
    }

    async fn flush_in_background(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        match tokio::task::spawn_blocking(move || manager.flush()).await {
            Ok(Ok(true)) => debug!("queue flushed"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "queue flush failed, will retry"),
            Err(e) => error!(error = %e, "queue flush task panicked"),
        }
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // every critical section leaves the state consistent, so a poisoned
        // lock is still safe to use
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition<F>(&self, id: &ItemId, apply: F) -> Result<QueueItem, QueueError>
    where
        F: FnOnce(&mut QueueItem, DateTime<Utc>) -> Result<(), QueueError>,
    {
        let now = self.clock.now();
        let updated = {
            let mut state = self.lock_state();
            let item = state
                .items
                .get_mut(id)
                .ok_or(QueueError::ItemNotFound(*id))?;
            apply(item, now)?;
            let updated = item.clone();
            state.touch();
            updated
        };

        self.emit(ItemEvent::from_item(ItemEventKind::StatusChanged, &updated, now));
        Ok(updated)
    }

    fn remove_where<P>(&self, now: DateTime<Utc>, mut predicate: P) -> usize
    where
        P: FnMut(&QueueItem) -> bool,
    {
        let removed: Vec<QueueItem> = {
            let mut state = self.lock_state();
            let ids: Vec<ItemId> = state
                .items
                .values()
                .filter(|&item| predicate(item))
                .map(|item| item.id)
                .collect();
            let removed: Vec<QueueItem> = ids
                .iter()
                .filter_map(|id| state.items.remove(id))
                .collect();
            if !removed.is_empty() {
                state.touch();
            }
            removed
        };

        for item in &removed {
            self.emit(ItemEvent::from_item(ItemEventKind::Removed, item, now));
        }
        removed.len()
    }

    fn emit(&self, event: ItemEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
