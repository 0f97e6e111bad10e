//! Minimal interface of a publish/subscribe transport used in a request/reply fashion
//!
//! A transport owns the connection to the messaging system and all subscription bookkeeping.
//! Callers only see two operations: publishing a request together with a callback for its
//! replies, and arming a timer for the same correlation. Neither of them suspends; all
//! results are delivered through the callbacks.
//!
//! Implementations are expected to forget about a correlation once it is finished (either its
//! reply budget is used up or its timer fired) and to ignore anything that arrives for it afterwards.
//! The [`CorrelationRegistry`] implements exactly that and is shared by the bundled transports.

mod registry;

pub use registry::*;

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the raw payload of every reply received for a correlation
pub type ReplyHandler = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

/// Callback invoked once the timer of a correlation expires
pub type TimeoutHandler = Box<dyn FnOnce() + Send + 'static>;

/// Opaque token identifying one in-flight request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationHandle(String);

impl CorrelationHandle {
    /// Wraps a transport specific identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Transport specific identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CorrelationHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery hints passed along with a request
///
/// Transports may use them to release resources early. Consumers must not rely on them being honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestHints {
    /// Number of replies after which the correlation may be forgotten, unlimited if `None`
    pub max_replies: Option<usize>,
}

impl RequestHints {
    /// Hints for a request which expects exactly one reply
    pub fn single_reply() -> Self {
        Self {
            max_replies: Some(1),
        }
    }
}

/// Publish/subscribe transport capable of correlated requests
pub trait Transport {
    /// Publishes a request to the destination and registers a handler for its replies
    fn request(
        &self,
        destination: &str,
        payload: Vec<u8>,
        hints: RequestHints,
        on_reply: ReplyHandler,
    ) -> CorrelationHandle;

    /// Arms a timer for an in-flight request, replacing any previous one
    ///
    /// Has no effect if the correlation is no longer known to the transport.
    fn timeout(&self, handle: &CorrelationHandle, duration: Duration, on_timeout: TimeoutHandler);
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn request(
        &self,
        destination: &str,
        payload: Vec<u8>,
        hints: RequestHints,
        on_reply: ReplyHandler,
    ) -> CorrelationHandle {
        self.as_ref().request(destination, payload, hints, on_reply)
    }

    fn timeout(&self, handle: &CorrelationHandle, duration: Duration, on_timeout: TimeoutHandler) {
        self.as_ref().timeout(handle, duration, on_timeout)
    }
}
