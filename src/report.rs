//! Final result of a run, as text or JSON.

use serde::Serialize;
use std::fmt;

use crate::aggregate::{Reconciliation, Tally};
use crate::isolation::IsolationLevel;
use crate::model::ResourceId;

/// Settled counts plus the reconciled seat state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub isolation: IsolationLevel,
    pub users: usize,
    pub resource: ResourceId,
    #[serde(flatten)]
    pub tally: Tally,
    #[serde(flatten)]
    pub reconciliation: Reconciliation,
}

impl SimulationReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Results ===")?;
        writeln!(f, "Isolation Level: {}", self.isolation)?;
        writeln!(f, "Simulated Users: {}", self.users)?;
        writeln!(f, "Successful Reservations: {}", self.tally.success)?;
        writeln!(f, "Conflicts: {}", self.tally.conflict)?;
        writeln!(f, "Errors: {}", self.tally.error)?;
        writeln!(f, "Final Seat State: {}", self.reconciliation.final_state)?;
        write!(f, "Confirmed Reservations: {}", self.reconciliation.confirmed_reservations)
    }
}
