use crate::library::communication::transport::{
    CorrelationHandle, CorrelationRegistry, Delivery, ReplyHandler, RequestHints, TimeoutHandler,
    Transport,
};
use pretty_assertions::assert_eq;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

type RespondFn = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Clone)]
struct MockResponder {
    delay: Duration,
    respond: RespondFn,
}

#[derive(Default)]
struct MockState {
    next_correlation: u64,
    responders: HashMap<String, MockResponder>,
    published: Vec<PublishedRequest>,
}

/// Request as it has been handed to the [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRequest {
    /// Destination the request was sent to
    pub destination: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Hints passed along with the request
    pub hints: RequestHints,
    /// Handle assigned to the request
    pub correlation: CorrelationHandle,
}

/// In-memory broker implementing [`Transport`]
///
/// Destinations without a responder swallow requests silently. Responders run on the ambient
/// tokio runtime after their configured delay, and all correlation bookkeeping is done by a
/// [`CorrelationRegistry`] so tests can observe that nothing lingers once a request is finished.
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MockTransport {
    registry: CorrelationRegistry,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answers every request on the destination with the replies produced by the function
    pub fn respond_with<F>(&self, destination: &str, delay: Duration, respond: F) -> &Self
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.lock().responders.insert(
            destination.to_owned(),
            MockResponder {
                delay,
                respond: Arc::new(respond),
            },
        );

        self
    }

    /// Answers every request on the destination with its own payload
    pub fn echo(&self, destination: &str, delay: Duration) -> &Self {
        self.respond_with(destination, delay, |payload| vec![payload.to_vec()])
    }

    /// Answers every request on the destination with a fixed reply
    pub fn reply_with(&self, destination: &str, delay: Duration, reply: impl Into<Vec<u8>>) -> &Self {
        let reply = reply.into();
        self.respond_with(destination, delay, move |_| vec![reply.clone()])
    }

    /// Stops answering requests on the destination
    pub fn silence(&self, destination: &str) -> &Self {
        self.lock().responders.remove(destination);
        self
    }

    /// All requests published so far, oldest first
    pub fn requests(&self) -> Vec<PublishedRequest> {
        self.lock().published.clone()
    }

    /// Asserts that the latest request on the destination carries the JSON form of the value
    pub fn assert_published<Q: Serialize + ?Sized>(&self, destination: &str, request: &Q) {
        let expected = serde_json::to_value(request).expect("Expected request is not serializable");

        let published = self
            .requests()
            .into_iter()
            .rev()
            .find(|published| published.destination == destination)
            .unwrap_or_else(|| panic!("Nothing has been published to {}", destination));

        let actual: Value = serde_json::from_slice(&published.payload)
            .expect("Published payload is not valid JSON");

        assert_eq!(expected, actual);
    }

    /// Number of correlations awaiting replies
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of armed timers
    pub fn timer_count(&self) -> usize {
        self.registry.timer_count()
    }
}

impl Transport for MockTransport {
    fn request(
        &self,
        destination: &str,
        payload: Vec<u8>,
        hints: RequestHints,
        on_reply: ReplyHandler,
    ) -> CorrelationHandle {
        let (handle, responder) = {
            let mut state = self.lock();
            state.next_correlation += 1;

            let handle = CorrelationHandle::new(format!("mock.{}", state.next_correlation));
            state.published.push(PublishedRequest {
                destination: destination.to_owned(),
                payload: payload.clone(),
                hints,
                correlation: handle.clone(),
            });

            (handle, state.responders.get(destination).cloned())
        };

        self.registry.register(handle.clone(), hints, on_reply);

        if let Some(responder) = responder {
            let registry = self.registry.clone();
            let correlation = handle.clone();

            let worker = tokio::spawn(async move {
                sleep(responder.delay).await;

                for reply in (responder.respond)(&payload) {
                    if registry.deliver(&correlation, reply) != Delivery::Accepting {
                        break;
                    }
                }
            });

            self.registry.attach_worker(&handle, worker);
        }

        handle
    }

    fn timeout(&self, handle: &CorrelationHandle, duration: Duration, on_timeout: TimeoutHandler) {
        self.registry.schedule_timeout(handle, duration, on_timeout)
    }
}
