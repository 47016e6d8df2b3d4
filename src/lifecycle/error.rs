//! Errors that abort a whole run.

use thiserror::Error;

use crate::isolation::UnresolvedIsolationLevel;
use crate::model::ResourceId;
use crate::store::StoreError;

/// Setup-time and reconciliation failures. Per-actor failures never surface
/// here; they are counted instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HarnessError {
    /// The isolation label did not resolve. No actor was started.
    #[error(transparent)]
    UnresolvedIsolationLevel(#[from] UnresolvedIsolationLevel),

    /// The datastore could not be reached.
    #[error("Error connecting to the datastore: {0}")]
    Connection(#[source] StoreError),

    /// The pre-run reset failed.
    #[error("Error resetting {resource}: {source}")]
    Reset {
        resource: ResourceId,
        source: StoreError,
    },

    /// The post-run read failed, so the counts cannot be reconciled.
    #[error("Error reading final state: {0}")]
    Reconcile(#[source] StoreError),
}
