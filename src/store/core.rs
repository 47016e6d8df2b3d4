//! # Store Contract
//!
//! This module defines what the harness needs from a transactional datastore.
//!
//! ## Key Types
//!
//! - [`ResourceStore`]: the handle. Opens transactions and performs the
//!   out-of-transaction setup and reconciliation calls.
//! - [`StoreTransaction`]: one open transaction at a fixed isolation level.
//! - [`StoreError`]: a datastore failure tagged with its [`SqlState`].

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;

use crate::isolation::IsolationLevel;
use crate::model::{ActorId, ResourceId, ResourceState};

// =============================================================================
// 1. ERRORS
// =============================================================================

/// Five-character SQLSTATE code reported with every datastore failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlState(Cow<'static, str>);

impl SqlState {
    /// `40001`: the transaction could not be serialized against concurrent ones.
    pub const SERIALIZATION_FAILURE: SqlState = SqlState(Cow::Borrowed("40001"));
    /// `40P01`: deadlock detected.
    pub const DEADLOCK_DETECTED: SqlState = SqlState(Cow::Borrowed("40P01"));
    /// `08003`: the connection does not exist (closed handle).
    pub const CONNECTION_DOES_NOT_EXIST: SqlState = SqlState(Cow::Borrowed("08003"));
    /// `08006`: the connection failed.
    pub const CONNECTION_FAILURE: SqlState = SqlState(Cow::Borrowed("08006"));
    /// `P0002`: a point read found no row.
    pub const NO_DATA_FOUND: SqlState = SqlState(Cow::Borrowed("P0002"));
    /// `23503`: an insert referenced a missing row.
    pub const FOREIGN_KEY_VIOLATION: SqlState = SqlState(Cow::Borrowed("23503"));
    /// `22003`: a key does not fit the column type.
    pub const NUMERIC_VALUE_OUT_OF_RANGE: SqlState = SqlState(Cow::Borrowed("22003"));
    /// `XX000`: anything else.
    pub const INTERNAL_ERROR: SqlState = SqlState(Cow::Borrowed("XX000"));

    /// Wraps a code reported by a driver.
    pub fn new(code: impl Into<String>) -> Self {
        Self(Cow::Owned(code.into()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A failure surfaced by the datastore at any point of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (SQLSTATE {code})")]
pub struct StoreError {
    pub code: SqlState,
    pub message: String,
}

impl StoreError {
    pub fn new(code: SqlState, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::new(SqlState::SERIALIZATION_FAILURE, message)
    }

    pub fn connection_closed() -> Self {
        Self::new(SqlState::CONNECTION_DOES_NOT_EXIST, "connection is closed")
    }

    pub fn no_data_found(resource: ResourceId) -> Self {
        Self::new(SqlState::NO_DATA_FOUND, format!("no row for {resource}"))
    }

    pub fn is_serialization_failure(&self) -> bool {
        self.code == SqlState::SERIALIZATION_FAILURE
    }
}

// =============================================================================
// 2. THE STORE TRAITS
// =============================================================================

/// A transactional datastore holding resource state and reservation records.
///
/// Implementations own the data; the harness only observes and mutates it
/// through [`StoreTransaction`]s and the setup/reconciliation calls below.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Verifies the handle is usable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Opens a transaction at `isolation`.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Transaction, StoreError>;

    /// Sets `resource` to available and deletes all its reservation records,
    /// atomically.
    async fn reset(&self, resource: ResourceId) -> Result<(), StoreError>;

    /// Latest committed state, read outside any actor transaction.
    async fn final_state(&self, resource: ResourceId) -> Result<ResourceState, StoreError>;

    /// Number of confirmed reservation records for `resource`.
    async fn confirmed_count(&self, resource: ResourceId) -> Result<u64, StoreError>;
}

/// One open transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
#[async_trait]
pub trait StoreTransaction: Send + 'static {
    /// Point read of the resource state under this transaction's snapshot rules.
    async fn read_state(&mut self, resource: ResourceId) -> Result<ResourceState, StoreError>;

    /// Sets the state to reserved only if it is available at write time.
    /// Returns the number of rows changed (0 or 1).
    async fn conditional_set_reserved(&mut self, resource: ResourceId) -> Result<u64, StoreError>;

    /// Appends a confirmed reservation record.
    async fn insert_reservation(
        &mut self,
        actor: ActorId,
        resource: ResourceId,
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
