//! Independent and project agnostic libraries
//!
//! The submodules in here do not know about any concrete deployment. They describe how a request travels
//! over a transport and how its reply finds its way back to the caller, leaving the choice of transport
//! and serialization format to the user.

pub mod communication;
pub mod helpers;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
