//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter driven by
//! `RUST_LOG`. The module path is hidden (`with_target(false)`); spans carry
//! the context instead.
//!
//! ## What Gets Traced
//!
//! - **Run lifecycle**: resolved isolation level, reset, barrier, final tally
//! - **Actor attempts**: one `actor` span per simulated actor (index + identity)
//!   wrapping an `attempt` span (resource + isolation)
//! - **Protocol transitions**: `Transition state=...` at debug level
//! - **Store internals**: begin/read/lock waits/commit at trace level
//!
//! ## Usage Examples
//!
//! ```bash
//! # Run summary only
//! RUST_LOG=info cargo run -- --users 20 --isolation serializable
//!
//! # Every protocol transition and conflict
//! RUST_LOG=debug cargo run -- --users 5
//!
//! # Include row-lock waits inside the store
//! RUST_LOG=isolation_harness::store=trace cargo run
//! ```
//!
//! With `RUST_LOG=debug` a losing actor under read committed looks like:
//!
//! ```text
//! DEBUG actor:attempt: Transition state=state_read resource_state=available index=3 actor=user_4
//! DEBUG actor:attempt: Transition state=validated index=3 actor=user_4
//! DEBUG actor:attempt: Transition state=rolled_back from=validated index=3 actor=user_4
//! DEBUG actor:attempt: Reservation conflicted at=validated error=Conditional update on seat_1 matched no rows
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
