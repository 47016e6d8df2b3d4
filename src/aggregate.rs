//! # Outcome Aggregator
//!
//! Counters shared by every actor of a run, plus the post-run reconciliation
//! read. Counters only support an atomic increment; there is no way to
//! decrement or overwrite one while actors are running.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::model::{ResourceId, ResourceState};
use crate::store::{ResourceStore, StoreError};

/// Terminal outcome of one actor's reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Conflict,
    Error,
}

/// Lock-free success/conflict/error counters.
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    success: AtomicU64,
    conflict: AtomicU64,
    error: AtomicU64,
}

impl OutcomeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments exactly one counter.
    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.success,
            Outcome::Conflict => &self.conflict,
            Outcome::Error => &self.error,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Reads all three counters.
    ///
    /// Only meaningful once every actor has finished; while actors run the
    /// three loads are not taken at a single instant.
    pub fn snapshot(&self) -> Tally {
        Tally {
            success: self.success.load(Ordering::SeqCst),
            conflict: self.conflict.load(Ordering::SeqCst),
            error: self.error.load(Ordering::SeqCst),
        }
    }
}

/// Settled counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub success: u64,
    pub conflict: u64,
    pub error: u64,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.success + self.conflict + self.error
    }
}

/// Post-run view of the resource, read outside any actor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub final_state: ResourceState,
    pub confirmed_reservations: u64,
}

impl Reconciliation {
    /// Reads the final state and the confirmed reservation count.
    pub async fn read<S: ResourceStore>(store: &S, resource: ResourceId) -> Result<Self, StoreError> {
        let final_state = store.final_state(resource).await?;
        let confirmed_reservations = store.confirmed_count(resource).await?;
        debug!(%resource, %final_state, confirmed_reservations, "Reconciled");
        Ok(Self {
            final_state,
            confirmed_reservations,
        })
    }

    /// Whether the datastore agrees with the counted successes: one success
    /// means one confirmed record and a reserved resource, none means an
    /// available resource with no records.
    pub fn agrees_with(&self, tally: &Tally) -> bool {
        match tally.success {
            0 => self.final_state == ResourceState::Available && self.confirmed_reservations == 0,
            1 => self.final_state == ResourceState::Reserved && self.confirmed_reservations == 1,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_increments_one_counter() {
        let counters = OutcomeCounters::new();
        counters.record(Outcome::Success);
        counters.record(Outcome::Conflict);
        counters.record(Outcome::Conflict);
        counters.record(Outcome::Error);

        assert_eq!(
            counters.snapshot(),
            Tally {
                success: 1,
                conflict: 2,
                error: 1
            }
        );
        assert_eq!(counters.snapshot().total(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let counters = Arc::new(OutcomeCounters::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let counters = counters.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let outcome = match i % 3 {
                        0 => Outcome::Success,
                        1 => Outcome::Conflict,
                        _ => Outcome::Error,
                    };
                    counters.record(outcome);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let tally = counters.snapshot();
        assert_eq!(tally.total(), 6400);
        assert_eq!(tally.success, 22 * 100);
        assert_eq!(tally.conflict, 21 * 100);
        assert_eq!(tally.error, 21 * 100);
    }

    #[test]
    fn test_reconciliation_agreement() {
        let reserved = Reconciliation {
            final_state: ResourceState::Reserved,
            confirmed_reservations: 1,
        };
        let available = Reconciliation {
            final_state: ResourceState::Available,
            confirmed_reservations: 0,
        };
        let one = Tally { success: 1, conflict: 4, error: 0 };
        let none = Tally { success: 0, conflict: 0, error: 3 };

        assert!(reserved.agrees_with(&one));
        assert!(available.agrees_with(&none));
        assert!(!reserved.agrees_with(&none));
        assert!(!available.agrees_with(&one));
        assert!(!reserved.agrees_with(&Tally { success: 2, conflict: 0, error: 0 }));
    }
}
