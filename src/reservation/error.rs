//! Error types for the reservation protocol.

use thiserror::Error;

use super::ProtocolState;
use crate::aggregate::Outcome;
use crate::model::{ResourceId, ResourceState};
use crate::store::StoreError;

/// Ways a single reservation attempt can end without committing.
///
/// Every variant is contained within the actor that hit it and maps to
/// exactly one [`Outcome`]. None of them is retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReservationError {
    /// The read showed the resource was already claimed.
    #[error("Resource {resource} is already {state}")]
    LogicalConflict {
        resource: ResourceId,
        state: ResourceState,
    },

    /// The conditional update affected no rows: another actor won the race.
    #[error("Conditional update on {resource} matched no rows")]
    RaceConflict { resource: ResourceId },

    /// The datastore could not serialize the transaction.
    #[error("Serialization conflict in state {at}: {source}")]
    SerializationConflict { at: ProtocolState, source: StoreError },

    /// Any other datastore failure.
    #[error("Datastore error in state {at}: {source}")]
    Datastore { at: ProtocolState, source: StoreError },
}

impl ReservationError {
    pub fn outcome(&self) -> Outcome {
        match self {
            ReservationError::LogicalConflict { .. }
            | ReservationError::RaceConflict { .. }
            | ReservationError::SerializationConflict { .. } => Outcome::Conflict,
            ReservationError::Datastore { .. } => Outcome::Error,
        }
    }

    /// The last state the protocol reached before failing.
    pub fn state(&self) -> ProtocolState {
        match self {
            ReservationError::LogicalConflict { .. } => ProtocolState::StateRead,
            ReservationError::RaceConflict { .. } => ProtocolState::Validated,
            ReservationError::SerializationConflict { at, .. }
            | ReservationError::Datastore { at, .. } => *at,
        }
    }

    /// The underlying datastore failure, if there was one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ReservationError::SerializationConflict { source, .. }
            | ReservationError::Datastore { source, .. } => Some(source),
            _ => None,
        }
    }
}
