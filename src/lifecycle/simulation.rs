use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::error::HarnessError;
use crate::actor::ActorPool;
use crate::aggregate::{Outcome, OutcomeCounters, Reconciliation};
use crate::classifier::{ConflictClassifier, SqlStateClassifier};
use crate::isolation::IsolationLevel;
use crate::model::ResourceId;
use crate::report::SimulationReport;
use crate::reservation::ReservationProtocol;
use crate::store::ResourceStore;

/// What a run does: how many actors, at which isolation, on which seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSettings {
    pub users: usize,
    /// Label resolved when the run starts.
    pub isolation: String,
    pub resource: ResourceId,
    pub pool: ActorPool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            users: 5,
            isolation: IsolationLevel::ReadCommitted.label().to_string(),
            resource: ResourceId(1),
            pool: ActorPool::default(),
        }
    }
}

/// The orchestrator for one contention run.
///
/// `Simulation` is responsible for:
/// - **Setup**: resolving the isolation label, checking the store handle and
///   resetting the seat. Any failure here aborts before an actor starts.
/// - **Fan-out**: spawning one Tokio task per simulated actor.
/// - **Barrier**: waiting for every task to reach a terminal outcome.
/// - **Reconciliation**: reading the settled seat state for the report.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::seeded(ResourceId(1)));
/// let mut simulation = Simulation::new(store, SimulationSettings::default());
/// let report = simulation.run().await?;
/// println!("{report}");
/// ```
pub struct Simulation<S, C = SqlStateClassifier> {
    store: Arc<S>,
    classifier: Arc<C>,
    settings: SimulationSettings,
    counters: Arc<OutcomeCounters>,
}

impl<S: ResourceStore> Simulation<S> {
    pub fn new(store: Arc<S>, settings: SimulationSettings) -> Self {
        Self::with_classifier(store, Arc::new(SqlStateClassifier), settings)
    }
}

impl<S: ResourceStore, C: ConflictClassifier> Simulation<S, C> {
    pub fn with_classifier(store: Arc<S>, classifier: Arc<C>, settings: SimulationSettings) -> Self {
        Self {
            store,
            classifier,
            settings,
            counters: Arc::new(OutcomeCounters::new()),
        }
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    /// Counters of the latest run. Untouched if that run aborted during setup.
    pub fn counters(&self) -> &OutcomeCounters {
        &self.counters
    }

    /// Runs every actor once and reports the settled result.
    ///
    /// Only setup and reconciliation failures are returned as errors; actor
    /// failures are counted.
    pub async fn run(&mut self) -> Result<SimulationReport, HarnessError> {
        let resource = self.settings.resource;
        let isolation: IsolationLevel = self.settings.isolation.parse()?;

        self.store.ping().await.map_err(HarnessError::Connection)?;
        self.store
            .reset(resource)
            .await
            .map_err(|source| HarnessError::Reset { resource, source })?;

        self.counters = Arc::new(OutcomeCounters::new());
        let protocol = ReservationProtocol::with_classifier(
            self.store.clone(),
            self.classifier.clone(),
            isolation,
            resource,
        );

        info!(
            users = self.settings.users,
            %isolation,
            %resource,
            pool = self.settings.pool.size(),
            "Launching actors"
        );

        let mut tasks = JoinSet::new();
        for actor in self.settings.pool.actors(self.settings.users) {
            let protocol = protocol.clone();
            let counters = self.counters.clone();
            tasks.spawn(async move { actor.run(protocol, &counters).await });
        }

        // Barrier: nothing is read until every actor is done.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Actor task failed");
                self.counters.record(Outcome::Error);
            }
        }

        let tally = self.counters.snapshot();
        let reconciliation = Reconciliation::read(self.store.as_ref(), resource)
            .await
            .map_err(HarnessError::Reconcile)?;

        if !reconciliation.agrees_with(&tally) {
            warn!(?tally, ?reconciliation, "Datastore disagrees with counted outcomes");
        }
        info!(
            success = tally.success,
            conflict = tally.conflict,
            error = tally.error,
            final_state = %reconciliation.final_state,
            "Run complete"
        );

        Ok(SimulationReport {
            isolation,
            users: self.settings.users,
            resource,
            tally,
            reconciliation,
        })
    }
}
