//! # PostgreSQL Store
//!
//! [`PgStore`] runs the harness against a live PostgreSQL database with the
//! seat table `Asiento (id_asiento, estado)` and the reservation table
//! `Reserva (id_usuario, id_asiento, estado)`. Isolation is whatever the
//! server implements. This module only opens transactions at the requested
//! level and turns driver errors into [`StoreError`]s that carry the server's
//! SQLSTATE, so [`SqlStateClassifier`](crate::classifier::SqlStateClassifier)
//! judges them exactly like the in-memory store's.
//!
//! Every transaction runs on its own connection. A semaphore bounds how many
//! are open at once.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState as PgSqlState;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, trace, warn};

use super::core::{ResourceStore, SqlState, StoreError, StoreTransaction};
use crate::isolation::IsolationLevel;
use crate::model::{ActorId, ResourceId, ResourceState};

const SELECT_STATE: &str = "SELECT estado::text FROM Asiento WHERE id_asiento = $1";
const RESERVE: &str =
    "UPDATE Asiento SET estado = 'reservado' WHERE id_asiento = $1 AND estado = 'disponible'";
const INSERT_RESERVATION: &str =
    "INSERT INTO Reserva (id_usuario, id_asiento, estado) VALUES ($1, $2, 'confirmada')";
const RELEASE: &str = "UPDATE Asiento SET estado = 'disponible' WHERE id_asiento = $1";
const PURGE: &str = "DELETE FROM Reserva WHERE id_asiento = $1";
const COUNT_CONFIRMED: &str =
    "SELECT COUNT(*) FROM Reserva WHERE id_asiento = $1 AND estado = 'confirmada'";

// Seat states as the schema stores them.
const AVAILABLE: &str = "disponible";
const RESERVED: &str = "reservado";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// 1. SETTINGS
// =============================================================================

/// Where the database lives and how many sessions may be open at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub max_connections: usize,
}

impl Default for PgSettings {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            max_connections: 20,
        }
    }
}

impl PgSettings {
    /// Driver configuration. TLS is disabled.
    pub fn config(&self) -> Config {
        let mut config = Config::new();
        config
            .user(&self.user)
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .ssl_mode(SslMode::Disable)
            .connect_timeout(CONNECT_TIMEOUT);
        if !self.password.is_empty() {
            config.password(self.password.as_bytes());
        }
        config
    }
}

// =============================================================================
// 2. ERROR & VALUE MAPPING
// =============================================================================

/// The harness code for a driver failure. Server errors keep their own
/// SQLSTATE; client-side failures have none.
fn sql_state(code: Option<&PgSqlState>, connection_lost: bool) -> SqlState {
    match code {
        Some(code) => SqlState::new(code.code()),
        None if connection_lost => SqlState::CONNECTION_FAILURE,
        None => SqlState::INTERNAL_ERROR,
    }
}

fn store_error(err: tokio_postgres::Error) -> StoreError {
    let code = sql_state(err.code(), err.is_closed());
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    StoreError::new(code, message)
}

fn connect_error(err: tokio_postgres::Error) -> StoreError {
    StoreError::new(sql_state(err.code(), true), err.to_string())
}

fn seat_key(resource: ResourceId) -> Result<i32, StoreError> {
    i32::try_from(resource.0).map_err(|_| {
        StoreError::new(
            SqlState::NUMERIC_VALUE_OUT_OF_RANGE,
            format!("{resource} does not fit an integer key"),
        )
    })
}

fn user_key(actor: ActorId) -> Result<i32, StoreError> {
    i32::try_from(actor.0).map_err(|_| {
        StoreError::new(
            SqlState::NUMERIC_VALUE_OUT_OF_RANGE,
            format!("{actor} does not fit an integer key"),
        )
    })
}

fn parse_state(raw: &str) -> Result<ResourceState, StoreError> {
    match raw {
        AVAILABLE => Ok(ResourceState::Available),
        RESERVED => Ok(ResourceState::Reserved),
        other => Err(StoreError::new(
            SqlState::INTERNAL_ERROR,
            format!("unknown seat state {other:?}"),
        )),
    }
}

fn begin_statement(isolation: IsolationLevel) -> &'static str {
    match isolation {
        IsolationLevel::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
        IsolationLevel::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
        IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
    }
}

async fn open(config: &Config) -> Result<Client, StoreError> {
    let (client, connection) = config.connect(NoTls).await.map_err(connect_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "Connection terminated");
        }
    });
    Ok(client)
}

async fn select_state(client: &Client, resource: ResourceId) -> Result<ResourceState, StoreError> {
    let seat = seat_key(resource)?;
    let row = client
        .query_opt(SELECT_STATE, &[&seat])
        .await
        .map_err(store_error)?
        .ok_or_else(|| StoreError::no_data_found(resource))?;
    let raw: String = row.try_get(0).map_err(store_error)?;
    parse_state(&raw)
}

// =============================================================================
// 3. THE STORE HANDLE
// =============================================================================

/// A PostgreSQL-backed [`ResourceStore`].
pub struct PgStore {
    config: Config,
    /// Autocommit session for health checks and reconciliation reads.
    admin: Client,
    sessions: Arc<Semaphore>,
}

impl PgStore {
    /// Opens the administrative session. Fails with the server's SQLSTATE, or
    /// `08006` when the server cannot be reached.
    pub async fn connect(settings: &PgSettings) -> Result<Self, StoreError> {
        let config = settings.config();
        let admin = open(&config).await?;
        debug!(host = %settings.host, port = settings.port, dbname = %settings.dbname, "Connected");
        Ok(Self {
            config,
            admin,
            sessions: Arc::new(Semaphore::new(settings.max_connections.max(1))),
        })
    }
}

#[async_trait]
impl ResourceStore for PgStore {
    type Transaction = PgTransaction;

    async fn ping(&self) -> Result<(), StoreError> {
        self.admin.batch_execute("SELECT 1").await.map_err(store_error)
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<PgTransaction, StoreError> {
        let permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::connection_closed())?;
        let client = open(&self.config).await?;
        client
            .batch_execute(begin_statement(isolation))
            .await
            .map_err(store_error)?;
        trace!(%isolation, "Begin");
        Ok(PgTransaction {
            client,
            _permit: permit,
        })
    }

    async fn reset(&self, resource: ResourceId) -> Result<(), StoreError> {
        let seat = seat_key(resource)?;
        let mut client = open(&self.config).await?;
        let tx = client.transaction().await.map_err(store_error)?;
        let released = tx.execute(RELEASE, &[&seat]).await.map_err(store_error)?;
        let purged = tx.execute(PURGE, &[&seat]).await.map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        debug!(%resource, released, purged, "Reset");
        Ok(())
    }

    async fn final_state(&self, resource: ResourceId) -> Result<ResourceState, StoreError> {
        select_state(&self.admin, resource).await
    }

    async fn confirmed_count(&self, resource: ResourceId) -> Result<u64, StoreError> {
        let seat = seat_key(resource)?;
        let row = self
            .admin
            .query_one(COUNT_CONFIRMED, &[&seat])
            .await
            .map_err(store_error)?;
        let count: i64 = row.try_get(0).map_err(store_error)?;
        Ok(count.max(0) as u64)
    }
}

// =============================================================================
// 4. TRANSACTIONS
// =============================================================================

/// An open transaction on a dedicated session. Dropping it closes the
/// session, which the server treats as a rollback.
pub struct PgTransaction {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn read_state(&mut self, resource: ResourceId) -> Result<ResourceState, StoreError> {
        select_state(&self.client, resource).await
    }

    async fn conditional_set_reserved(&mut self, resource: ResourceId) -> Result<u64, StoreError> {
        let seat = seat_key(resource)?;
        self.client
            .execute(RESERVE, &[&seat])
            .await
            .map_err(store_error)
    }

    async fn insert_reservation(
        &mut self,
        actor: ActorId,
        resource: ResourceId,
    ) -> Result<(), StoreError> {
        let user = user_key(actor)?;
        let seat = seat_key(resource)?;
        self.client
            .execute(INSERT_RESERVATION, &[&user, &seat])
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.client.batch_execute("COMMIT").await.map_err(store_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.client.batch_execute("ROLLBACK").await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ConflictClassifier, FailureClass, SqlStateClassifier};

    #[test]
    fn test_settings_build_driver_config() {
        let settings = PgSettings {
            user: "harness".to_string(),
            password: "secret".to_string(),
            host: "db".to_string(),
            port: 6543,
            dbname: "cinema".to_string(),
            max_connections: 4,
        };
        let config = settings.config();

        assert_eq!(config.get_user(), Some("harness"));
        assert_eq!(config.get_password(), Some(b"secret".as_ref()));
        assert_eq!(config.get_dbname(), Some("cinema"));
        assert_eq!(config.get_ports(), &[6543]);

        let no_password = PgSettings::default().config();
        assert_eq!(no_password.get_password(), None);
    }

    #[test]
    fn test_server_codes_reach_the_classifier_unchanged() {
        let classifier = SqlStateClassifier;

        let serialization = sql_state(Some(&PgSqlState::T_R_SERIALIZATION_FAILURE), false);
        assert_eq!(serialization, SqlState::SERIALIZATION_FAILURE);
        assert_eq!(
            classifier.classify(&StoreError::new(serialization, "could not serialize access")),
            FailureClass::Conflict
        );

        let deadlock = sql_state(Some(&PgSqlState::T_R_DEADLOCK_DETECTED), false);
        assert_eq!(deadlock, SqlState::DEADLOCK_DETECTED);
        assert_eq!(
            classifier.classify(&StoreError::new(deadlock, "deadlock detected")),
            FailureClass::Error
        );
    }

    #[test]
    fn test_client_side_failures() {
        assert_eq!(sql_state(None, true), SqlState::CONNECTION_FAILURE);
        assert_eq!(sql_state(None, false), SqlState::INTERNAL_ERROR);

        let err = seat_key(ResourceId(u64::from(u32::MAX))).unwrap_err();
        assert_eq!(err.code, SqlState::NUMERIC_VALUE_OUT_OF_RANGE);
        assert_eq!(seat_key(ResourceId(1)), Ok(1));
        assert_eq!(user_key(ActorId(8)), Ok(8));
    }

    #[test]
    fn test_stored_states() {
        assert_eq!(parse_state("disponible"), Ok(ResourceState::Available));
        assert_eq!(parse_state("reservado"), Ok(ResourceState::Reserved));
        assert_eq!(parse_state("roto").unwrap_err().code, SqlState::INTERNAL_ERROR);
    }

    #[test]
    fn test_begin_statements() {
        for level in IsolationLevel::ALL {
            let statement = begin_statement(level);
            assert!(
                statement.ends_with(&level.label().to_uppercase()),
                "{statement} for {level}"
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_failure() {
        let settings = PgSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..PgSettings::default()
        };

        let Err(err) = PgStore::connect(&settings).await else {
            panic!("connected to a closed port");
        };
        assert_eq!(err.code, SqlState::CONNECTION_FAILURE);
    }
}
