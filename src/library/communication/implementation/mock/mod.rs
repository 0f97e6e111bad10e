//! In-memory implementations for testing purposes

mod transport;

pub use transport::*;
