//! # BridgeMCP Core
//!
//! Shared primitives used by every other crate in the workspace: the error
//! taxonomy (spec §7), random id/token generation, and a clock abstraction so
//! expiry logic is testable without real sleeps.

pub mod error;
pub mod ids;
pub mod time;

pub use error::{Error, ErrorKind, Result};
pub use time::{Clock, FixedClock, SharedClock, SystemClock, system_clock};
