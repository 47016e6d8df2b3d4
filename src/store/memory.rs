//! # In-Memory Transactional Store
//!
//! [`MemoryStore`] keeps every resource as a chain of committed row versions,
//! each stamped with a commit timestamp from a single monotonic clock. It
//! arbitrates concurrent writers the way a relational datastore does:
//!
//! - **Row write locks**: a conditional update takes the row's lock and keeps
//!   it until commit or rollback. A second writer waits asynchronously.
//! - **Read committed**: every statement sees the latest committed version. A
//!   waiting writer re-evaluates its predicate once it owns the lock.
//! - **Repeatable read**: statements see the snapshot taken at `begin`.
//!   Updating a row that has a committed version newer than the snapshot
//!   fails with `40001`.
//! - **Serializable**: repeatable read, and at commit every row that was read
//!   must still have the version that was observed, otherwise `40001`.
//!
//! Versions that no open transaction can see any more are pruned whenever a
//! row is written, so a chain stays short across repeated runs.
//!
//! The state tables live behind a `parking_lot` mutex that is never held
//! across an `.await`; only the per-row `tokio` locks are.

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, trace};

use super::core::{ResourceStore, SqlState, StoreError, StoreTransaction};
use crate::isolation::IsolationLevel;
use crate::model::{ActorId, ReservationRecord, ResourceId, ResourceState};

type Timestamp = u64;

// =============================================================================
// 1. TABLES
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct RowVersion {
    state: ResourceState,
    committed_at: Timestamp,
}

struct ResourceRow {
    /// Ascending by `committed_at`.
    versions: Vec<RowVersion>,
    lock: Arc<RowLock<()>>,
}

impl ResourceRow {
    fn new(state: ResourceState, committed_at: Timestamp) -> Self {
        Self {
            versions: vec![RowVersion { state, committed_at }],
            lock: Arc::new(RowLock::new(())),
        }
    }

    fn latest(&self) -> Option<RowVersion> {
        self.versions.last().copied()
    }

    fn visible_at(&self, snapshot: Timestamp) -> Option<RowVersion> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.committed_at <= snapshot)
            .copied()
    }

    /// Drops every version older than the one visible at `horizon`.
    fn prune(&mut self, horizon: Timestamp) {
        let keep_from = self
            .versions
            .iter()
            .rposition(|v| v.committed_at <= horizon)
            .unwrap_or(0);
        self.versions.drain(..keep_from);
    }

    fn push(&mut self, version: RowVersion, horizon: Timestamp) {
        self.versions.push(version);
        self.prune(horizon);
    }
}

#[derive(Default)]
struct Tables {
    clock: Timestamp,
    resources: HashMap<ResourceId, ResourceRow>,
    reservations: Vec<ReservationRecord>,
    /// Snapshot timestamp of every open transaction, with a count.
    snapshots: BTreeMap<Timestamp, usize>,
    closed: bool,
}

impl Tables {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        self.clock
    }

    /// Oldest snapshot still in use.
    fn horizon(&self) -> Timestamp {
        self.snapshots.keys().next().copied().unwrap_or(self.clock)
    }

    fn register(&mut self, snapshot: Timestamp) {
        *self.snapshots.entry(snapshot).or_insert(0) += 1;
    }

    fn release(&mut self, snapshot: Timestamp) {
        if let Some(count) = self.snapshots.get_mut(&snapshot) {
            *count -= 1;
            if *count == 0 {
                self.snapshots.remove(&snapshot);
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    next_txn: AtomicU64,
}

impl Shared {
    fn open(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        let tables = self.tables.lock();
        if tables.closed {
            return Err(StoreError::connection_closed());
        }
        Ok(tables)
    }

    fn row_lock(&self, resource: ResourceId) -> Result<Option<Arc<RowLock<()>>>, StoreError> {
        let tables = self.open()?;
        Ok(tables.resources.get(&resource).map(|row| row.lock.clone()))
    }
}

// =============================================================================
// 2. THE STORE HANDLE
// =============================================================================

/// Cloneable handle to an in-process transactional store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one available resource.
    pub fn seeded(resource: ResourceId) -> Self {
        let store = Self::new();
        {
            let mut tables = store.shared.tables.lock();
            let ts = tables.tick();
            tables
                .resources
                .insert(resource, ResourceRow::new(ResourceState::Available, ts));
        }
        store
    }

    /// Inserts a resource row, or commits a new version of an existing one.
    pub fn insert_resource(&self, resource: ResourceId, state: ResourceState) -> Result<(), StoreError> {
        let mut guard = self.shared.open()?;
        let tables = &mut *guard;
        let ts = tables.tick();
        let horizon = tables.horizon();
        match tables.resources.get_mut(&resource) {
            Some(row) => row.push(RowVersion { state, committed_at: ts }, horizon),
            None => {
                tables.resources.insert(resource, ResourceRow::new(state, ts));
            }
        }
        debug!(%resource, %state, ts, "Resource written");
        Ok(())
    }

    /// Committed reservation records for `resource`, in commit order.
    pub fn reservations_for(&self, resource: ResourceId) -> Result<Vec<ReservationRecord>, StoreError> {
        let tables = self.shared.open()?;
        Ok(tables
            .reservations
            .iter()
            .filter(|r| r.resource == resource)
            .cloned()
            .collect())
    }

    /// Closes the handle. Every later call fails with `08003`.
    pub fn close(&self) {
        self.shared.tables.lock().closed = true;
        debug!("Store closed");
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn ping(&self) -> Result<(), StoreError> {
        self.shared.open().map(|_| ())
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<MemoryTransaction, StoreError> {
        let snapshot = {
            let mut tables = self.shared.open()?;
            let snapshot = tables.clock;
            tables.register(snapshot);
            snapshot
        };
        let id = self.shared.next_txn.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(txn = id, %isolation, snapshot, "Begin");
        Ok(MemoryTransaction {
            shared: self.shared.clone(),
            id,
            isolation,
            snapshot,
            reads: HashMap::new(),
            writes: HashMap::new(),
            inserts: Vec::new(),
            locks: HashMap::new(),
        })
    }

    async fn reset(&self, resource: ResourceId) -> Result<(), StoreError> {
        let Some(lock) = self.shared.row_lock(resource)? else {
            debug!(%resource, "Reset matched no resource");
            return Ok(());
        };
        let _row = lock.lock().await;

        let mut guard = self.shared.open()?;
        let tables = &mut *guard;
        let ts = tables.tick();
        let horizon = tables.horizon();
        if let Some(row) = tables.resources.get_mut(&resource) {
            row.push(
                RowVersion {
                    state: ResourceState::Available,
                    committed_at: ts,
                },
                horizon,
            );
        }
        let before = tables.reservations.len();
        tables.reservations.retain(|r| r.resource != resource);
        debug!(%resource, purged = before - tables.reservations.len(), "Reset");
        Ok(())
    }

    async fn final_state(&self, resource: ResourceId) -> Result<ResourceState, StoreError> {
        let tables = self.shared.open()?;
        tables
            .resources
            .get(&resource)
            .and_then(ResourceRow::latest)
            .map(|v| v.state)
            .ok_or_else(|| StoreError::no_data_found(resource))
    }

    async fn confirmed_count(&self, resource: ResourceId) -> Result<u64, StoreError> {
        let tables = self.shared.open()?;
        Ok(tables
            .reservations
            .iter()
            .filter(|r| r.resource == resource && r.is_confirmed())
            .count() as u64)
    }
}

// =============================================================================
// 3. TRANSACTIONS
// =============================================================================

/// An open [`MemoryStore`] transaction.
///
/// Writes are buffered until commit. Row locks are released when the
/// transaction is committed, rolled back or dropped.
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    id: u64,
    isolation: IsolationLevel,
    snapshot: Timestamp,
    /// Commit timestamp of the version each resource read returned.
    reads: HashMap<ResourceId, Timestamp>,
    writes: HashMap<ResourceId, ResourceState>,
    inserts: Vec<ReservationRecord>,
    locks: HashMap<ResourceId, OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    fn visible(&self, row: &ResourceRow) -> Option<RowVersion> {
        if self.isolation.uses_snapshot() {
            row.visible_at(self.snapshot)
        } else {
            row.latest()
        }
    }

    fn validate_reads(&self, tables: &Tables) -> Result<(), StoreError> {
        for (resource, observed) in &self.reads {
            let latest = tables
                .resources
                .get(resource)
                .and_then(ResourceRow::latest)
                .map(|v| v.committed_at);
            if latest != Some(*observed) {
                return Err(StoreError::serialization_failure(
                    "could not serialize access due to read/write dependencies among transactions",
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn read_state(&mut self, resource: ResourceId) -> Result<ResourceState, StoreError> {
        if let Some(state) = self.writes.get(&resource) {
            return Ok(*state);
        }

        let version = {
            let tables = self.shared.open()?;
            tables
                .resources
                .get(&resource)
                .and_then(|row| self.visible(row))
                .ok_or_else(|| StoreError::no_data_found(resource))?
        };
        self.reads.entry(resource).or_insert(version.committed_at);
        trace!(txn = self.id, %resource, state = %version.state, "Read");
        Ok(version.state)
    }

    async fn conditional_set_reserved(&mut self, resource: ResourceId) -> Result<u64, StoreError> {
        if let Some(state) = self.writes.get_mut(&resource) {
            if !state.is_available() {
                return Ok(0);
            }
            *state = ResourceState::Reserved;
            return Ok(1);
        }

        let Some(lock) = self.shared.row_lock(resource)? else {
            return Ok(0);
        };
        if !self.locks.contains_key(&resource) {
            trace!(txn = self.id, %resource, "Waiting for row lock");
            let guard = lock.lock_owned().await;
            self.locks.insert(resource, guard);
        }

        let matched = {
            let tables = self.shared.open()?;
            let Some(row) = tables.resources.get(&resource) else {
                return Ok(0);
            };
            let Some(target) = self.visible(row) else {
                return Ok(0);
            };
            let newer_commit = row
                .latest()
                .is_some_and(|latest| latest.committed_at > target.committed_at);

            if !target.state.is_available() {
                false
            } else if self.isolation.uses_snapshot() && newer_commit {
                return Err(StoreError::serialization_failure(
                    "could not serialize access due to concurrent update",
                ));
            } else {
                true
            }
        };

        if !matched {
            trace!(txn = self.id, %resource, "Conditional update matched no rows");
            return Ok(0);
        }
        self.writes.insert(resource, ResourceState::Reserved);
        trace!(txn = self.id, %resource, "Conditional update matched");
        Ok(1)
    }

    async fn insert_reservation(
        &mut self,
        actor: ActorId,
        resource: ResourceId,
    ) -> Result<(), StoreError> {
        let exists = {
            let tables = self.shared.open()?;
            tables
                .resources
                .get(&resource)
                .and_then(ResourceRow::latest)
                .is_some()
        };
        if !exists {
            return Err(StoreError::new(
                SqlState::FOREIGN_KEY_VIOLATION,
                format!("reservation references missing {resource}"),
            ));
        }
        self.inserts.push(ReservationRecord::confirmed(actor, resource));
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let mut guard = self.shared.open()?;
        let tables = &mut *guard;

        if self.isolation == IsolationLevel::Serializable {
            self.validate_reads(tables)?;
        }
        if self.writes.is_empty() && self.inserts.is_empty() {
            trace!(txn = self.id, "Commit (read-only)");
            return Ok(());
        }

        let ts = tables.tick();
        let horizon = tables.horizon();
        for (resource, state) in self.writes.drain() {
            if let Some(row) = tables.resources.get_mut(&resource) {
                row.push(RowVersion { state, committed_at: ts }, horizon);
            }
        }
        tables.reservations.append(&mut self.inserts);
        debug!(txn = self.id, ts, "Commit");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        drop(self.shared.open()?);
        trace!(txn = self.id, discarded = self.writes.len() + self.inserts.len(), "Rollback");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.shared.tables.lock().release(self.snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEAT: ResourceId = ResourceId(1);

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::seeded(SEAT);

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(tx.read_state(SEAT).await.unwrap(), ResourceState::Available);
        assert_eq!(tx.conditional_set_reserved(SEAT).await.unwrap(), 1);
        // Own write is visible inside the transaction.
        assert_eq!(tx.read_state(SEAT).await.unwrap(), ResourceState::Reserved);
        assert_eq!(tx.conditional_set_reserved(SEAT).await.unwrap(), 0);
        tx.insert_reservation(ActorId(3), SEAT).await.unwrap();

        // Nothing visible before commit.
        assert_eq!(store.final_state(SEAT).await.unwrap(), ResourceState::Available);
        assert_eq!(store.confirmed_count(SEAT).await.unwrap(), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.final_state(SEAT).await.unwrap(), ResourceState::Reserved);
        assert_eq!(store.confirmed_count(SEAT).await.unwrap(), 1);
        assert_eq!(
            store.reservations_for(SEAT).unwrap(),
            vec![ReservationRecord::confirmed(ActorId(3), SEAT)]
        );
    }

    #[tokio::test]
    async fn test_rollback_and_drop_release_row_lock() {
        let store = MemoryStore::seeded(SEAT);

        let mut first = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(first.conditional_set_reserved(SEAT).await.unwrap(), 1);
        first.rollback().await.unwrap();

        let mut second = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(second.conditional_set_reserved(SEAT).await.unwrap(), 1);
        drop(second);

        let mut third = store.begin(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(third.conditional_set_reserved(SEAT).await.unwrap(), 1);
        third.commit().await.unwrap();
        assert_eq!(store.final_state(SEAT).await.unwrap(), ResourceState::Reserved);
    }

    #[tokio::test]
    async fn test_read_committed_sees_concurrent_commit() {
        let store = MemoryStore::seeded(SEAT);

        let mut reader = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(reader.read_state(SEAT).await.unwrap(), ResourceState::Available);

        let mut writer = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(writer.conditional_set_reserved(SEAT).await.unwrap(), 1);
        writer.commit().await.unwrap();

        // Non-repeatable read is allowed at this level.
        let mut fresh = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(fresh.read_state(SEAT).await.unwrap(), ResourceState::Reserved);
        assert_eq!(reader.conditional_set_reserved(SEAT).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_committed_waiter_reevaluates_predicate() {
        let store = MemoryStore::seeded(SEAT);

        let mut holder = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(holder.conditional_set_reserved(SEAT).await.unwrap(), 1);

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(tx.read_state(SEAT).await.unwrap(), ResourceState::Available);
        let waiter = tokio::spawn(async move { tx.conditional_set_reserved(SEAT).await });

        tokio::task::yield_now().await;
        holder.insert_reservation(ActorId(1), SEAT).await.unwrap();
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), Ok(0));
    }

    #[tokio::test]
    async fn test_repeatable_read_update_of_newer_row_fails() {
        let store = MemoryStore::seeded(SEAT);

        let mut late = store.begin(IsolationLevel::RepeatableRead).await.unwrap();

        let mut early = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(early.conditional_set_reserved(SEAT).await.unwrap(), 1);
        early.commit().await.unwrap();

        // Snapshot still shows the seat as free.
        assert_eq!(late.read_state(SEAT).await.unwrap(), ResourceState::Available);
        let err = late.conditional_set_reserved(SEAT).await.unwrap_err();
        assert!(err.is_serialization_failure(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_serializable_commit_validates_reads() {
        let store = MemoryStore::seeded(SEAT);

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(tx.read_state(SEAT).await.unwrap(), ResourceState::Available);
        tx.insert_reservation(ActorId(2), SEAT).await.unwrap();

        let mut other = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(other.conditional_set_reserved(SEAT).await.unwrap(), 1);
        other.commit().await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.is_serialization_failure());
        assert_eq!(store.confirmed_count(SEAT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let store = MemoryStore::seeded(SEAT);
        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.conditional_set_reserved(SEAT).await.unwrap();
        tx.insert_reservation(ActorId(1), SEAT).await.unwrap();
        tx.commit().await.unwrap();

        store.reset(SEAT).await.unwrap();
        let once = (
            store.final_state(SEAT).await.unwrap(),
            store.confirmed_count(SEAT).await.unwrap(),
        );
        store.reset(SEAT).await.unwrap();
        let twice = (
            store.final_state(SEAT).await.unwrap(),
            store.confirmed_count(SEAT).await.unwrap(),
        );

        assert_eq!(once, (ResourceState::Available, 0));
        assert_eq!(once, twice);
    }

    fn version_count(store: &MemoryStore) -> usize {
        store.shared.tables.lock().resources[&SEAT].versions.len()
    }

    #[tokio::test]
    async fn test_version_chain_stays_bounded() {
        let store = MemoryStore::seeded(SEAT);

        for actor in 1..=50 {
            store.reset(SEAT).await.unwrap();
            let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
            assert_eq!(tx.read_state(SEAT).await.unwrap(), ResourceState::Available);
            assert_eq!(tx.conditional_set_reserved(SEAT).await.unwrap(), 1);
            tx.insert_reservation(ActorId(actor), SEAT).await.unwrap();
            tx.commit().await.unwrap();
            assert!(version_count(&store) <= 2, "chain grew to {}", version_count(&store));
        }

        store.reset(SEAT).await.unwrap();
        assert_eq!(version_count(&store), 1);
        assert!(store.shared.tables.lock().snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_open_snapshot_keeps_its_version() {
        let store = MemoryStore::seeded(SEAT);
        let mut old = store.begin(IsolationLevel::RepeatableRead).await.unwrap();

        for _ in 0..5 {
            let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
            assert_eq!(tx.conditional_set_reserved(SEAT).await.unwrap(), 1);
            tx.commit().await.unwrap();
            store.reset(SEAT).await.unwrap();
        }
        store.insert_resource(SEAT, ResourceState::Reserved).unwrap();

        // The first version is still what the old snapshot sees.
        assert_eq!(old.read_state(SEAT).await.unwrap(), ResourceState::Available);
        drop(old);

        store.reset(SEAT).await.unwrap();
        assert_eq!(version_count(&store), 1);
    }

    #[tokio::test]
    async fn test_missing_resource() {
        let store = MemoryStore::new();
        store.reset(SEAT).await.unwrap();

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert_eq!(tx.read_state(SEAT).await.unwrap_err().code, SqlState::NO_DATA_FOUND);
        assert_eq!(tx.conditional_set_reserved(SEAT).await.unwrap(), 0);
        assert_eq!(
            tx.insert_reservation(ActorId(1), SEAT).await.unwrap_err().code,
            SqlState::FOREIGN_KEY_VIOLATION
        );
        assert_eq!(store.final_state(SEAT).await.unwrap_err().code, SqlState::NO_DATA_FOUND);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryStore::seeded(SEAT);
        store.ping().await.unwrap();
        store.close();

        assert_eq!(store.ping().await.unwrap_err().code, SqlState::CONNECTION_DOES_NOT_EXIST);
        assert!(store.begin(IsolationLevel::Serializable).await.is_err());
        assert!(store.reset(SEAT).await.is_err());
    }
}
