//! # Mock Store
//!
//! A scripted [`ResourceStore`] for driving the reservation protocol down
//! paths a real store only reaches under rare interleavings (a serialization
//! failure at commit, an insert that errors, a begin that never happens).
//!
//! Queue responses with the `expect_*` builders, run the code under test,
//! then call [`MockStore::verify`]. Every call consumes the next expectation
//! in order; a call that does not match it panics.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::core::{ResourceStore, StoreError, StoreTransaction};
use crate::isolation::IsolationLevel;
use crate::model::{ActorId, ResourceId, ResourceState};

// =============================================================================
// EXPECTATIONS & CALL LOG
// =============================================================================

/// A queued response to the next store call.
#[derive(Debug)]
enum Expectation {
    Ping(Result<(), StoreError>),
    Begin(Result<(), StoreError>),
    Reset(Result<(), StoreError>),
    ReadState(Result<ResourceState, StoreError>),
    ConditionalSetReserved(Result<u64, StoreError>),
    InsertReservation(Result<(), StoreError>),
    Commit(Result<(), StoreError>),
    Rollback(Result<(), StoreError>),
    FinalState(Result<ResourceState, StoreError>),
    ConfirmedCount(Result<u64, StoreError>),
}

/// A call the mock received, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Ping,
    Begin(IsolationLevel),
    Reset(ResourceId),
    ReadState(ResourceId),
    ConditionalSetReserved(ResourceId),
    InsertReservation(ActorId, ResourceId),
    Commit,
    Rollback,
    FinalState(ResourceId),
    ConfirmedCount(ResourceId),
}

#[derive(Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    calls: Vec<Call>,
}

type SharedState = Arc<Mutex<MockState>>;

fn next_expectation(state: &SharedState, call: Call) -> Expectation {
    let mut state = state.lock();
    state.calls.push(call.clone());
    match state.expectations.pop_front() {
        Some(expectation) => expectation,
        None => panic!("Unexpected call {call:?}: no expectations left"),
    }
}

macro_rules! respond {
    ($state:expr, $call:expr, $variant:ident) => {{
        let call = $call;
        match next_expectation($state, call.clone()) {
            Expectation::$variant(response) => response,
            other => panic!("Expectation mismatch: got call {call:?}, expected {other:?}"),
        }
    }};
}

// =============================================================================
// MOCK STORE
// =============================================================================

/// A store that replays queued responses.
///
/// # Example
/// ```ignore
/// let mock = MockStore::new();
/// mock.expect_begin().return_ok(());
/// mock.expect_read_state().return_ok(ResourceState::Available);
/// mock.expect_conditional_set_reserved().return_ok(1);
/// mock.expect_insert_reservation().return_ok(());
/// mock.expect_commit().return_err(StoreError::serialization_failure("abort"));
///
/// // Run the protocol against `mock.clone()`...
/// mock.verify(); // Ensures all expectations were met
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    state: SharedState,
}

impl MockStore {
    /// Creates a new mock store with no expectations.
    pub fn new() -> Self {
        Self::default()
    }

    fn builder<T>(&self, wrap: fn(Result<T, StoreError>) -> Expectation) -> ExpectationBuilder<T> {
        ExpectationBuilder {
            state: self.state.clone(),
            wrap,
        }
    }

    pub fn expect_ping(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Ping)
    }

    /// `return_ok(())` hands out a transaction; `return_err` fails the begin.
    pub fn expect_begin(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Begin)
    }

    pub fn expect_reset(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Reset)
    }

    pub fn expect_read_state(&self) -> ExpectationBuilder<ResourceState> {
        self.builder(Expectation::ReadState)
    }

    pub fn expect_conditional_set_reserved(&self) -> ExpectationBuilder<u64> {
        self.builder(Expectation::ConditionalSetReserved)
    }

    pub fn expect_insert_reservation(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::InsertReservation)
    }

    pub fn expect_commit(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Commit)
    }

    pub fn expect_rollback(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Rollback)
    }

    pub fn expect_final_state(&self) -> ExpectationBuilder<ResourceState> {
        self.builder(Expectation::FinalState)
    }

    pub fn expect_confirmed_count(&self) -> ExpectationBuilder<u64> {
        self.builder(Expectation::ConfirmedCount)
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let state = self.state.lock();
        if !state.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining: {:?}",
                state.expectations.len(),
                state.expectations
            );
        }
    }
}

/// Queues the response for one expected call.
pub struct ExpectationBuilder<T> {
    state: SharedState,
    wrap: fn(Result<T, StoreError>) -> Expectation,
}

impl<T> ExpectationBuilder<T> {
    /// Sets the expectation to return a successful result.
    pub fn return_ok(self, value: T) {
        self.state.lock().expectations.push_back((self.wrap)(Ok(value)));
    }

    /// Sets the expectation to return an error.
    pub fn return_err(self, error: StoreError) {
        self.state.lock().expectations.push_back((self.wrap)(Err(error)));
    }
}

#[async_trait]
impl ResourceStore for MockStore {
    type Transaction = MockTransaction;

    async fn ping(&self) -> Result<(), StoreError> {
        respond!(&self.state, Call::Ping, Ping)
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<MockTransaction, StoreError> {
        respond!(&self.state, Call::Begin(isolation), Begin)?;
        Ok(MockTransaction {
            state: self.state.clone(),
        })
    }

    async fn reset(&self, resource: ResourceId) -> Result<(), StoreError> {
        respond!(&self.state, Call::Reset(resource), Reset)
    }

    async fn final_state(&self, resource: ResourceId) -> Result<ResourceState, StoreError> {
        respond!(&self.state, Call::FinalState(resource), FinalState)
    }

    async fn confirmed_count(&self, resource: ResourceId) -> Result<u64, StoreError> {
        respond!(&self.state, Call::ConfirmedCount(resource), ConfirmedCount)
    }
}

/// Transaction handed out by [`MockStore::begin`].
pub struct MockTransaction {
    state: SharedState,
}

#[async_trait]
impl StoreTransaction for MockTransaction {
    async fn read_state(&mut self, resource: ResourceId) -> Result<ResourceState, StoreError> {
        respond!(&self.state, Call::ReadState(resource), ReadState)
    }

    async fn conditional_set_reserved(&mut self, resource: ResourceId) -> Result<u64, StoreError> {
        respond!(&self.state, Call::ConditionalSetReserved(resource), ConditionalSetReserved)
    }

    async fn insert_reservation(
        &mut self,
        actor: ActorId,
        resource: ResourceId,
    ) -> Result<(), StoreError> {
        respond!(&self.state, Call::InsertReservation(actor, resource), InsertReservation)
    }

    async fn commit(self) -> Result<(), StoreError> {
        respond!(&self.state, Call::Commit, Commit)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        respond!(&self.state, Call::Rollback, Rollback)
    }
}
