use super::{PendingReply, RequestReplyClient};
use crate::library::communication::codec::{Codec, JsonCodec};
use crate::library::communication::transport::Transport;
use crate::library::communication::RequestError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{instrument, trace, warn};

/// Tagged outcome handed to a parked caller
#[derive(Debug)]
enum Resumption<R> {
    Response(R),
    Error(RequestError),
}

/// Shared between both listeners, only the first one to fire finds the sender
type ResumptionSlot<R> = Arc<Mutex<Option<oneshot::Sender<Resumption<R>>>>>;

fn resume<R>(slot: &ResumptionSlot<R>, resumption: Resumption<R>) {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();

    if let Some(sender) = sender {
        if sender.send(resumption).is_err() {
            trace!("Caller stopped waiting for its response");
        }
    }
}

/// Parks the current task until the [`Deferred`](super::Deferred) resolves
///
/// Both listeners are registered before the first suspension, so a resolution
/// that happened in the meantime still reaches the caller.
async fn park<R>(deferred: PendingReply<R>) -> Result<R, RequestError>
where
    R: Clone + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let on_response: ResumptionSlot<R> = Arc::new(Mutex::new(Some(tx)));
    let on_error = on_response.clone();

    deferred
        .callback(move |response| resume(&on_response, Resumption::Response(response)))
        .errback(move |error| resume(&on_error, Resumption::Error(error)));

    // From here on only the transport keeps the request alive
    drop(deferred);

    match rx.await {
        Ok(Resumption::Response(response)) => Ok(response),
        Ok(Resumption::Error(error)) => Err(error),
        Err(_) => {
            warn!("Transport dropped the request without completing it");
            Err(RequestError::Abandoned)
        }
    }
}

/// Awaitable front-end for a [`RequestReplyClient`]
///
/// Turns the [`Deferred`](super::Deferred) of a call into a plain `Result`. While waiting, only
/// the calling task is suspended; the runtime thread stays free to process replies and timers of
/// this and any other in-flight request. Failures of the request are passed on unchanged.
///
/// The one error the adapter adds is [`RequestError::Abandoned`], returned when the transport drops
/// the handlers of a request without ever invoking them. A raw [`Deferred`](super::Deferred) would
/// stay pending forever in that case.
pub struct SynchronousCallAdapter<T, C = JsonCodec> {
    client: RequestReplyClient<T, C>,
}

impl<T, C> SynchronousCallAdapter<T, C>
where
    T: Transport,
    C: Codec + Clone + Send + 'static,
{
    /// Wraps an existing client
    pub fn new(client: RequestReplyClient<T, C>) -> Self {
        Self { client }
    }

    /// Underlying client
    pub fn client(&self) -> &RequestReplyClient<T, C> {
        &self.client
    }

    /// Sends a request using the client's default deadline and waits for the outcome
    pub async fn call<Q, R>(&self, request: &Q) -> Result<R, RequestError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned + Clone + Send + 'static,
    {
        self.call_with_timeout(request, self.client.default_timeout())
            .await
    }

    /// Sends a request and waits for the decoded response or the first error
    #[instrument(skip(self, request), fields(destination = %self.client.destination()))]
    pub async fn call_with_timeout<Q, R>(
        &self,
        request: &Q,
        timeout: Duration,
    ) -> Result<R, RequestError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned + Clone + Send + 'static,
    {
        let deferred = self.client.call_with_timeout::<Q, R>(request, timeout)?;
        park(deferred).await
    }
}

impl<T, C> From<RequestReplyClient<T, C>> for SynchronousCallAdapter<T, C>
where
    T: Transport,
    C: Codec + Clone + Send + 'static,
{
    fn from(client: RequestReplyClient<T, C>) -> Self {
        Self::new(client)
    }
}
