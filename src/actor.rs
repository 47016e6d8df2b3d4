//! Simulated actors and the identity pool they are drawn from.

use std::num::NonZeroU32;
use tracing::{info_span, Instrument};

use crate::aggregate::{Outcome, OutcomeCounters};
use crate::classifier::ConflictClassifier;
use crate::model::ActorId;
use crate::reservation::ReservationProtocol;
use crate::store::ResourceStore;

/// Fixed-size pool of actor identities, assigned cyclically.
///
/// Actor `i` gets identity `(i mod size) + 1`, so with more actors than
/// identities several concurrent actors share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorPool {
    size: NonZeroU32,
}

impl ActorPool {
    pub const DEFAULT_SIZE: u32 = 8;

    /// Returns `None` for an empty pool.
    pub fn new(size: u32) -> Option<Self> {
        NonZeroU32::new(size).map(|size| Self { size })
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn identity(&self, index: usize) -> ActorId {
        let slot = (index as u64 % u64::from(self.size.get())) as u32;
        ActorId(slot + 1)
    }

    /// The first `count` actors, in launch order.
    pub fn actors(&self, count: usize) -> impl Iterator<Item = SimulatedActor> + '_ {
        (0..count).map(move |index| SimulatedActor {
            index,
            identity: self.identity(index),
        })
    }
}

impl Default for ActorPool {
    fn default() -> Self {
        Self {
            size: NonZeroU32::MIN.saturating_add(Self::DEFAULT_SIZE - 1),
        }
    }
}

/// One requester. Exists for a single reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedActor {
    pub index: usize,
    pub identity: ActorId,
}

impl SimulatedActor {
    /// Runs the protocol once and records the outcome in `counters`.
    pub async fn run<S, C>(
        self,
        protocol: ReservationProtocol<S, C>,
        counters: &OutcomeCounters,
    ) -> Outcome
    where
        S: ResourceStore,
        C: ConflictClassifier,
    {
        let span = info_span!("actor", index = self.index, actor = %self.identity);
        let outcome = protocol.attempt(self.identity).instrument(span).await;
        counters.record(outcome);
        outcome
    }
}
