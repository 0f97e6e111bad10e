//! Correlated request/reply calls with a deadline
//!
//! A [`RequestReplyClient`] publishes exactly one request per call and reports exactly one outcome
//! through a [`Deferred`]: either the first decoded reply or a [`RequestError`](super::RequestError).
//! The [`SynchronousCallAdapter`] builds on it for callers which would rather await a plain result.

use std::time::Duration;

mod client;
mod deferred;
mod synchronous;

pub use client::*;
pub use deferred::*;
pub use synchronous::*;

/// Deadline applied to calls which do not specify one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
