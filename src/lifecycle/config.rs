//! Command-line and environment configuration.

use clap::{Args, Parser, ValueEnum};
use std::sync::Arc;
use tracing::{info_span, Instrument};

use super::error::HarnessError;
use super::simulation::{Simulation, SimulationSettings};
use crate::actor::ActorPool;
use crate::model::ResourceId;
use crate::report::SimulationReport;
use crate::store::{MemoryStore, PgSettings, PgStore, ResourceStore};

/// Which datastore the actors contend on.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// In-process store seeded with one available seat
    #[default]
    Memory,
    /// PostgreSQL database with the seat and reservation tables
    Postgres,
}

/// Options for one simulation run. Every flag can also be set through the
/// environment variable named next to it.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "isolation-harness")]
#[command(about = "Races concurrent users for one seat and counts how an isolation level resolves it")]
#[command(version)]
pub struct HarnessConfig {
    /// Number of concurrent simulated users
    #[arg(short, long, env = "HARNESS_USERS", default_value_t = 5)]
    pub users: usize,

    /// Isolation level (read committed, repeatable read, serializable)
    #[arg(short, long, env = "HARNESS_ISOLATION", default_value = "read committed")]
    pub isolation: String,

    /// Seat the users contend for
    #[arg(long, env = "HARNESS_RESOURCE", default_value_t = 1)]
    pub resource: u64,

    /// Number of distinct user identities, assigned cyclically
    #[arg(
        long,
        env = "HARNESS_IDENTITY_POOL",
        default_value_t = ActorPool::DEFAULT_SIZE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub identity_pool: u32,

    /// Datastore to run against
    #[arg(long, env = "HARNESS_STORE", value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// PostgreSQL connection options, used with `--store postgres`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DatabaseArgs {
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_NAME", default_value = "postgres")]
    pub db_name: String,

    /// Sessions open at once; further actors wait for one to finish
    #[arg(
        long,
        env = "DB_MAX_CONNECTIONS",
        default_value_t = 20,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub db_max_connections: u32,
}

impl DatabaseArgs {
    pub fn settings(&self) -> PgSettings {
        PgSettings {
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            host: self.db_host.clone(),
            port: self.db_port,
            dbname: self.db_name.clone(),
            max_connections: self.db_max_connections as usize,
        }
    }
}

impl HarnessConfig {
    pub fn settings(&self) -> SimulationSettings {
        SimulationSettings {
            users: self.users,
            isolation: self.isolation.clone(),
            resource: ResourceId(self.resource),
            pool: ActorPool::new(self.identity_pool).unwrap_or_default(),
        }
    }

    /// Opens the selected store and runs one simulation on it.
    pub async fn run(&self) -> Result<SimulationReport, HarnessError> {
        let settings = self.settings();
        match self.store {
            StoreKind::Memory => {
                let store = MemoryStore::seeded(settings.resource);
                run_on(Arc::new(store), settings).await
            }
            StoreKind::Postgres => {
                let store = PgStore::connect(&self.database.settings())
                    .await
                    .map_err(HarnessError::Connection)?;
                run_on(Arc::new(store), settings).await
            }
        }
    }
}

async fn run_on<S: ResourceStore>(
    store: Arc<S>,
    settings: SimulationSettings,
) -> Result<SimulationReport, HarnessError> {
    let mut simulation = Simulation::new(store, settings);
    let span = info_span!("simulation", isolation = %simulation.settings().isolation);
    simulation.run().instrument(span).await
}
