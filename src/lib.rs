//! # Isolation Harness
//!
//! > **Race many users for one seat and watch an isolation level decide.**
//!
//! This crate drives N simulated concurrent actors against a single shared,
//! persistently stored resource and counts how a transactional isolation
//! level resolves the contention: how many "reserve this seat" attempts
//! succeed, how many are rejected as conflicts, and how many fail for other
//! reasons.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### The datastore arbitrates, not the application
//!
//! No actor ever takes an application-level lock on the seat. Each one runs
//! a read, check, conditional-write, insert sequence inside a single
//! transaction, and whichever writer the datastore lets through wins. The
//! harness only has to make the counting trustworthy:
//! `success + conflict + error == N`, always.
//!
//! ### Conflicts are outcomes, not retries
//!
//! A conflict is recorded and the actor stops. There is no retry loop
//! anywhere; the point is to observe the isolation level, not to hide it.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Store ([`store`])
//! The transactional datastore contract ([`ResourceStore`](store::ResourceStore),
//! [`StoreTransaction`](store::StoreTransaction)), the in-process
//! [`MemoryStore`](store::MemoryStore) with multi-version rows and row locks,
//! and [`PgStore`](store::PgStore) for a live PostgreSQL database.
//! [`store::mock`] holds a scripted store for tests.
//!
//! ### 2. The Protocol ([`reservation`])
//! The per-actor state machine
//! `Started → StateRead → Validated → Mutated → Recorded → Committed`, with
//! `RolledBack` reachable from every non-terminal state.
//!
//! ### 3. The Judges ([`isolation`], [`classifier`])
//! Label → [`IsolationLevel`](isolation::IsolationLevel), and datastore
//! failure → conflict or error.
//!
//! ### 4. The Harness ([`actor`], [`aggregate`], [`lifecycle`])
//! Cyclic actor identities, atomic outcome counters, and the
//! [`Simulation`](lifecycle::Simulation) that resets the seat, fans out the
//! actors, waits for all of them and reconciles the result.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Five users, serializable, with run-level logs
//! RUST_LOG=info cargo run -- --users 5 --isolation serializable
//!
//! # JSON report
//! cargo run -- --users 50 --isolation "repeatable read" --json
//!
//! # Against PostgreSQL
//! DB_HOST=localhost DB_USER=app DB_PASSWORD=secret DB_NAME=cinema \
//!     cargo run -- --store postgres --users 20 --isolation serializable
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod actor;
pub mod aggregate;
pub mod classifier;
pub mod isolation;
pub mod lifecycle;
pub mod model;
pub mod report;
pub mod reservation;
pub mod store;
