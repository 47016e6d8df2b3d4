//! Transactional datastore contract and its implementations.
//!
//! # Main Components
//!
//! - [`ResourceStore`] / [`StoreTransaction`] - The contract the protocol runs against
//! - [`MemoryStore`] - In-process multi-version store with row locks
//! - [`PgStore`] - A live PostgreSQL database, one session per transaction
//! - [`StoreError`] / [`SqlState`] - Datastore failures
//!
//! # Testing
//!
//! See [`mock`] for a scripted store that replays queued responses.

pub mod core;
pub mod memory;
pub mod mock;
pub mod postgres;

pub use self::core::*;
pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{PgSettings, PgStore, PgTransaction};
