//! # Run Lifecycle & Orchestration
//!
//! Individual actors are simple; sequencing a run is where the rules live.
//! This module owns that sequencing:
//!
//! 1. **Configuration** - [`HarnessConfig`] from flags and environment
//! 2. **Setup** - resolve the isolation label, ping the store, reset the seat
//! 3. **Fan-out** - one Tokio task per simulated actor
//! 4. **Barrier** - wait for every actor before reading anything
//! 5. **Reconciliation** - read the settled seat state for the report
//! 6. **Observability** - [`setup_tracing`]
//!
//! ## Failure Containment
//!
//! Steps 1-2 and 5 fail the whole run with a [`HarnessError`]. Nothing that
//! happens inside an actor can: each attempt ends as exactly one counted
//! outcome, so `success + conflict + error` always equals the number of
//! actors launched.

pub mod config;
pub mod error;
pub mod simulation;
pub mod tracing;

pub use self::config::*;
pub use self::error::*;
pub use self::simulation::*;
pub use self::tracing::*;
