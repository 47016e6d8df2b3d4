//! # Reservation Transaction Protocol
//!
//! The state machine every simulated actor runs exactly once, inside one
//! transaction at the configured isolation level:
//!
//! ```text
//! Started -> StateRead -> Validated -> Mutated -> Recorded -> Committed
//!    \__________\___________\___________\___________\______> RolledBack
//! ```
//!
//! The availability check after the read is a logical guard only. Under weak
//! isolation the read may not reflect a writer that is committing
//! concurrently, so the conditional update (`available -> reserved`,
//! predicated on the current state) is the real linearization point. Under
//! serializable isolation the datastore may still abort at commit even though
//! every statement succeeded, which is why commit failures go through the
//! [`ConflictClassifier`] like statement failures do.

pub mod error;

pub use error::*;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::Outcome;
use crate::classifier::{ConflictClassifier, FailureClass, SqlStateClassifier};
use crate::isolation::IsolationLevel;
use crate::model::{ActorId, ResourceId};
use crate::store::{ResourceStore, StoreError, StoreTransaction};

/// States of the reservation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Started,
    StateRead,
    Validated,
    Mutated,
    Recorded,
    Committed,
    RolledBack,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Started => "started",
            ProtocolState::StateRead => "state_read",
            ProtocolState::Validated => "validated",
            ProtocolState::Mutated => "mutated",
            ProtocolState::Recorded => "recorded",
            ProtocolState::Committed => "committed",
            ProtocolState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Runs reservation attempts against one resource at one isolation level.
///
/// Cheap to clone: the store and classifier are shared.
pub struct ReservationProtocol<S, C = SqlStateClassifier> {
    store: Arc<S>,
    classifier: Arc<C>,
    isolation: IsolationLevel,
    resource: ResourceId,
}

impl<S, C> Clone for ReservationProtocol<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            classifier: self.classifier.clone(),
            isolation: self.isolation,
            resource: self.resource,
        }
    }
}

impl<S: ResourceStore> ReservationProtocol<S> {
    /// Creates a protocol that classifies failures by SQLSTATE.
    pub fn new(store: Arc<S>, isolation: IsolationLevel, resource: ResourceId) -> Self {
        Self::with_classifier(store, Arc::new(SqlStateClassifier), isolation, resource)
    }
}

impl<S: ResourceStore, C: ConflictClassifier> ReservationProtocol<S, C> {
    pub fn with_classifier(
        store: Arc<S>,
        classifier: Arc<C>,
        isolation: IsolationLevel,
        resource: ResourceId,
    ) -> Self {
        Self {
            store,
            classifier,
            isolation,
            resource,
        }
    }

    /// Runs one attempt for `actor` and reduces it to its [`Outcome`].
    #[instrument(skip(self), fields(resource = %self.resource, isolation = %self.isolation))]
    pub async fn attempt(&self, actor: ActorId) -> Outcome {
        match self.run(actor).await {
            Ok(()) => {
                info!("Reservation committed");
                Outcome::Success
            }
            Err(err) => {
                let outcome = err.outcome();
                match outcome {
                    Outcome::Error => warn!(at = %err.state(), error = %err, "Reservation failed"),
                    _ => debug!(at = %err.state(), error = %err, "Reservation conflicted"),
                }
                outcome
            }
        }
    }

    /// Runs one attempt for `actor`.
    ///
    /// On every failure after `begin` the transaction is rolled back before
    /// this returns.
    pub async fn run(&self, actor: ActorId) -> Result<(), ReservationError> {
        // Started -> StateRead
        let mut tx = self
            .store
            .begin(self.isolation)
            .await
            .map_err(|source| ReservationError::Datastore {
                at: ProtocolState::Started,
                source,
            })?;

        let state = match tx.read_state(self.resource).await {
            Ok(state) => state,
            Err(source) => {
                let err = ReservationError::Datastore {
                    at: ProtocolState::Started,
                    source,
                };
                return Err(self.abort(tx, err).await);
            }
        };
        debug!(state = %ProtocolState::StateRead, resource_state = %state, "Transition");

        // StateRead -> Validated
        if !state.is_available() {
            let err = ReservationError::LogicalConflict {
                resource: self.resource,
                state,
            };
            return Err(self.abort(tx, err).await);
        }
        debug!(state = %ProtocolState::Validated, "Transition");

        // Validated -> Mutated
        match tx.conditional_set_reserved(self.resource).await {
            Ok(0) => {
                let err = ReservationError::RaceConflict {
                    resource: self.resource,
                };
                return Err(self.abort(tx, err).await);
            }
            Ok(_) => {}
            Err(source) => {
                let err = self.classify(ProtocolState::Validated, source);
                return Err(self.abort(tx, err).await);
            }
        }
        debug!(state = %ProtocolState::Mutated, "Transition");

        // Mutated -> Recorded
        if let Err(source) = tx.insert_reservation(actor, self.resource).await {
            let err = self.classify(ProtocolState::Mutated, source);
            return Err(self.abort(tx, err).await);
        }
        debug!(state = %ProtocolState::Recorded, "Transition");

        // Recorded -> Committed. A failed commit leaves nothing to roll back.
        tx.commit()
            .await
            .map_err(|source| self.classify(ProtocolState::Recorded, source))?;
        debug!(state = %ProtocolState::Committed, "Transition");
        Ok(())
    }

    fn classify(&self, at: ProtocolState, source: StoreError) -> ReservationError {
        match self.classifier.classify(&source) {
            FailureClass::Conflict => ReservationError::SerializationConflict { at, source },
            FailureClass::Error => ReservationError::Datastore { at, source },
        }
    }

    /// Rolls `tx` back. The outcome is already decided by `err`; a failing
    /// rollback is classified for the log and nothing else.
    async fn abort(&self, tx: S::Transaction, err: ReservationError) -> ReservationError {
        if let Err(rollback) = tx.rollback().await {
            let class = self.classifier.classify(&rollback);
            warn!(error = %rollback, ?class, "Rollback failed");
        }
        debug!(state = %ProtocolState::RolledBack, from = %err.state(), "Transition");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceState;
    use crate::store::mock::{Call, MockStore};
    use crate::store::SqlState;

    const SEAT: ResourceId = ResourceId(1);

    fn protocol(mock: &MockStore, isolation: IsolationLevel) -> ReservationProtocol<MockStore> {
        ReservationProtocol::new(Arc::new(mock.clone()), isolation, SEAT)
    }

    #[tokio::test]
    async fn test_happy_path_commits() {
        let mock = MockStore::new();
        mock.expect_begin().return_ok(());
        mock.expect_read_state().return_ok(ResourceState::Available);
        mock.expect_conditional_set_reserved().return_ok(1);
        mock.expect_insert_reservation().return_ok(());
        mock.expect_commit().return_ok(());

        let outcome = protocol(&mock, IsolationLevel::ReadCommitted)
            .attempt(ActorId(4))
            .await;

        assert_eq!(outcome, Outcome::Success);
        mock.verify();
        assert_eq!(
            mock.calls(),
            vec![
                Call::Begin(IsolationLevel::ReadCommitted),
                Call::ReadState(SEAT),
                Call::ConditionalSetReserved(SEAT),
                Call::InsertReservation(ActorId(4), SEAT),
                Call::Commit,
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_outcome() {
        let mock = MockStore::new();
        mock.expect_begin().return_ok(());
        mock.expect_read_state().return_ok(ResourceState::Reserved);
        mock.expect_rollback()
            .return_err(StoreError::new(SqlState::CONNECTION_FAILURE, "connection reset"));

        let err = protocol(&mock, IsolationLevel::Serializable)
            .run(ActorId(1))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ReservationError::LogicalConflict {
                resource: SEAT,
                state: ResourceState::Reserved
            }
        );
        assert_eq!(err.outcome(), Outcome::Conflict);
        mock.verify();
    }

    /// Defers to the SQLSTATE rules and remembers every code it was asked about.
    #[derive(Default)]
    struct RecordingClassifier {
        seen: parking_lot::Mutex<Vec<SqlState>>,
    }

    impl ConflictClassifier for RecordingClassifier {
        fn classify(&self, error: &StoreError) -> FailureClass {
            self.seen.lock().push(error.code.clone());
            SqlStateClassifier.classify(error)
        }
    }

    #[tokio::test]
    async fn test_failed_rollback_is_classified_but_outcome_stands() {
        let mock = MockStore::new();
        mock.expect_begin().return_ok(());
        mock.expect_read_state().return_ok(ResourceState::Available);
        mock.expect_conditional_set_reserved().return_ok(1);
        mock.expect_insert_reservation()
            .return_err(StoreError::new(SqlState::FOREIGN_KEY_VIOLATION, "missing seat"));
        mock.expect_rollback()
            .return_err(StoreError::serialization_failure("rollback interrupted"));

        let classifier = Arc::new(RecordingClassifier::default());
        let protocol = ReservationProtocol::with_classifier(
            Arc::new(mock.clone()),
            classifier.clone(),
            IsolationLevel::Serializable,
            SEAT,
        );

        assert_eq!(protocol.attempt(ActorId(2)).await, Outcome::Error);
        assert_eq!(
            *classifier.seen.lock(),
            vec![SqlState::FOREIGN_KEY_VIOLATION, SqlState::SERIALIZATION_FAILURE]
        );
        mock.verify();
    }

    #[test]
    fn test_error_states_and_outcomes() {
        let serialization = ReservationError::SerializationConflict {
            at: ProtocolState::Recorded,
            source: StoreError::serialization_failure("abort"),
        };
        assert_eq!(serialization.state(), ProtocolState::Recorded);
        assert_eq!(serialization.outcome(), Outcome::Conflict);
        assert!(serialization.store_error().is_some());

        let race = ReservationError::RaceConflict { resource: SEAT };
        assert_eq!(race.state(), ProtocolState::Validated);
        assert_eq!(race.outcome(), Outcome::Conflict);
        assert!(race.store_error().is_none());

        let other = ReservationError::Datastore {
            at: ProtocolState::Started,
            source: StoreError::connection_closed(),
        };
        assert_eq!(other.outcome(), Outcome::Error);
        assert_eq!(other.state(), ProtocolState::Started);
    }
}
