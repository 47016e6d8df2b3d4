//! Pure data structures shared by the store, the protocol and the harness.

pub mod reservation;
pub mod resource;

pub use reservation::*;
pub use resource::*;
