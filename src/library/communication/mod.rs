//! Request and response on top of publish and subscribe
//!
//! The underlying messaging system only knows how to send an opaque payload to a named
//! destination. Everything that turns this into a call with a result is layered on top:
//!
//! 1. A [`Transport`](transport::Transport) publishes the request, registers a callback for
//!    the reply that belongs to it and arms a timer for the same correlation.
//! 2. A [`Codec`](codec::Codec) translates between strongly typed values and the bytes on the wire.
//! 3. The [`RequestReplyClient`](request::RequestReplyClient) races the first decoded reply against
//!    the timer and reports the winner through a [`Deferred`](request::Deferred).
//! 4. The [`SynchronousCallAdapter`](request::SynchronousCallAdapter) parks the calling task until the
//!    [`Deferred`](request::Deferred) resolves, giving the caller plain return-or-error semantics.
//!
//! Concrete transports live in the [`implementation`] module.

mod error;

pub mod codec;
pub mod implementation;
pub mod request;
pub mod transport;

pub use error::RequestError;
