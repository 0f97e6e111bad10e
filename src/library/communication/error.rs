use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::library::BoxedError;

/// Shareable error source
///
/// Every listener of a [`Deferred`](super::request::Deferred) receives its own copy of the
/// outcome, so the causes are reference counted instead of boxed.
pub type SharedError = Arc<dyn Error + Send + Sync + 'static>;

/// Error type for requests sent through a [`RequestReplyClient`](super::request::RequestReplyClient)
///
/// Only [`EncodeFailed`](RequestError::EncodeFailed) is ever returned directly from a call.
/// All other variants travel through the failure channel of the request's
/// [`Deferred`](super::request::Deferred).
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    /// The request could not be serialized
    #[error("Failed encoding request: {0}")]
    EncodeFailed(#[source] SharedError),
    /// The reply arrived but could not be deserialized
    #[error("Failed decoding response: {0}")]
    DecodeFailed(#[source] SharedError),
    /// No reply arrived within the deadline
    #[error("Timed out after {}s.", .0.as_secs_f64())]
    TimedOut(Duration),
    /// The transport discarded the request without ever completing it
    #[error("Request was abandoned by the transport before it completed")]
    Abandoned,
}

impl RequestError {
    pub(crate) fn encode_failed(error: BoxedError) -> Self {
        Self::EncodeFailed(Arc::from(error))
    }

    pub(crate) fn decode_failed(error: BoxedError) -> Self {
        Self::DecodeFailed(Arc::from(error))
    }

    /// Whether the remote side may simply have been too slow
    ///
    /// Callers commonly repeat timed out requests while treating any other error as fatal.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}
