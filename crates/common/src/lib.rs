//! Shared types for the quoting core.

pub mod clock;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use types::AggregateId;
