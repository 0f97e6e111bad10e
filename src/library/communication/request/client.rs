use super::{Deferred, DEFAULT_TIMEOUT};
use crate::library::communication::codec::{Codec, JsonCodec};
use crate::library::communication::transport::{RequestHints, Transport};
use crate::library::communication::RequestError;
use crate::options::ClientOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// Eventual outcome of a single call
pub type PendingReply<R> = Deferred<R, RequestError>;

/// Sends correlated requests to one destination and resolves each with its first reply
///
/// Every call publishes exactly one request, arms exactly one timer and yields a [`Deferred`] which
/// resolves exactly once, no matter how the transport behaves. A reply is decoded completely before
/// the [`Deferred`] is touched, so the success and failure paths can never bleed into each other.
///
/// The client keeps no per-call state, all bookkeeping of in-flight requests belongs to the transport.
pub struct RequestReplyClient<T, C = JsonCodec> {
    transport: T,
    destination: String,
    codec: C,
    default_timeout: Duration,
}

impl<T> RequestReplyClient<T>
where
    T: Transport,
{
    /// Creates a new client which sends JSON encoded requests to the destination
    pub fn new(transport: T, destination: impl Into<String>) -> Self {
        Self {
            transport,
            destination: destination.into(),
            codec: JsonCodec,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates a new client from command line options
    pub fn from_options(transport: T, options: &ClientOptions) -> Self {
        Self::new(transport, options.destination.clone()).with_default_timeout(options.timeout)
    }
}

impl<T, C> RequestReplyClient<T, C>
where
    T: Transport,
    C: Codec + Clone + Send + 'static,
{
    /// Replaces the codec used for requests and replies
    pub fn with_codec<D>(self, codec: D) -> RequestReplyClient<T, D>
    where
        D: Codec + Clone + Send + 'static,
    {
        RequestReplyClient {
            transport: self.transport,
            destination: self.destination,
            codec,
            default_timeout: self.default_timeout,
        }
    }

    /// Replaces the deadline used by [`call`](RequestReplyClient::call)
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Destination requests are published to
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Deadline used by [`call`](RequestReplyClient::call)
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Transport used to deliver requests
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a request using the default deadline
    ///
    /// See [`call_with_timeout`](RequestReplyClient::call_with_timeout) for details.
    pub fn call<Q, R>(&self, request: &Q) -> Result<PendingReply<R>, RequestError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned + Clone + Send + 'static,
    {
        self.call_with_timeout(request, self.default_timeout)
    }

    /// Sends a request and returns the [`Deferred`] outcome
    ///
    /// Returns immediately. The only error returned directly is [`RequestError::EncodeFailed`]; in that
    /// case nothing has been published. Everything else, that is decoding failures and timeouts, is
    /// reported through the failure channel of the returned [`Deferred`].
    #[instrument(skip(self, request), fields(destination = %self.destination))]
    pub fn call_with_timeout<Q, R>(
        &self,
        request: &Q,
        timeout: Duration,
    ) -> Result<PendingReply<R>, RequestError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned + Clone + Send + 'static,
    {
        let payload = self
            .codec
            .encode(request)
            .map_err(RequestError::encode_failed)?;

        let deferred = PendingReply::<R>::new();

        let on_reply = {
            let deferred = deferred.clone();
            let codec = self.codec.clone();

            Box::new(move |reply: Vec<u8>| {
                let outcome = codec
                    .decode::<R>(&reply)
                    .map_err(RequestError::decode_failed);

                if let Err(error) = &outcome {
                    debug!(%error, "Received undecodable reply");
                }

                if !deferred.resolve(outcome) {
                    trace!("Ignoring reply for settled request");
                }
            })
        };

        let handle = self.transport.request(
            &self.destination,
            payload,
            RequestHints::single_reply(),
            on_reply,
        );

        trace!(correlation = %handle, "Published request");

        let on_timeout = {
            let deferred = deferred.clone();

            Box::new(move || {
                if deferred.fail(RequestError::TimedOut(timeout)) {
                    debug!(?timeout, "Request timed out");
                } else {
                    trace!("Ignoring timeout for settled request");
                }
            })
        };

        self.transport.timeout(&handle, timeout, on_timeout);

        Ok(deferred)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::mock::MockTransport;
    use crate::library::communication::transport::{
        CorrelationHandle, ReplyHandler, TimeoutHandler,
    };
    use pretty_assertions::assert_eq;
    use serde::ser::Error as _;
    use serde::Serializer;
    use serde_json::{json, Value};
    use std::mem;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::sleep;

    const QUEUE: &str = "test";

    fn request() -> Value {
        json!({ "test": "request" })
    }

    async fn settled<R: Clone + Send + 'static>(
        deferred: &PendingReply<R>,
    ) -> Result<R, RequestError> {
        loop {
            if let Some(outcome) = deferred.outcome() {
                return outcome;
            }

            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Transport which hands out its callbacks so tests can fire them in arbitrary order
    #[derive(Default)]
    struct ChaoticTransport {
        hints: Mutex<Vec<RequestHints>>,
        replies: Mutex<Vec<ReplyHandler>>,
        timeouts: Mutex<Vec<TimeoutHandler>>,
    }

    impl ChaoticTransport {
        fn reply(&self, payload: &[u8]) {
            let mut handlers = mem::take(&mut *self.replies.lock().unwrap());

            for handler in handlers.iter_mut() {
                handler(payload.to_vec());
            }

            self.replies.lock().unwrap().extend(handlers);
        }

        fn expire(&self) {
            let handlers = mem::take(&mut *self.timeouts.lock().unwrap());

            for handler in handlers {
                handler();
            }
        }
    }

    impl Transport for ChaoticTransport {
        fn request(
            &self,
            _destination: &str,
            _payload: Vec<u8>,
            hints: RequestHints,
            on_reply: ReplyHandler,
        ) -> CorrelationHandle {
            self.hints.lock().unwrap().push(hints);
            self.replies.lock().unwrap().push(on_reply);
            CorrelationHandle::new("chaos")
        }

        fn timeout(
            &self,
            _handle: &CorrelationHandle,
            _duration: Duration,
            on_timeout: TimeoutHandler,
        ) {
            self.timeouts.lock().unwrap().push(on_timeout);
        }
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not today"))
        }
    }

    fn count_resolutions(deferred: &PendingReply<Value>) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let s = successes.clone();
        let f = failures.clone();
        deferred
            .callback(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .errback(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            });

        (successes, failures)
    }

    #[tokio::test]
    async fn publish_encoded_request_to_destination() {
        let transport = MockTransport::default();
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        client.call::<_, Value>(&request()).unwrap();

        transport.assert_published(QUEUE, &request());
        assert_eq!(transport.requests()[0].hints, RequestHints::single_reply());
    }

    #[tokio::test]
    async fn resolve_with_echoed_request() {
        let transport = MockTransport::default();
        transport.echo(QUEUE, Duration::from_millis(50));
        let client = RequestReplyClient::new(transport, QUEUE);

        let deferred = client
            .call_with_timeout::<_, Value>(&request(), Duration::from_secs(10))
            .unwrap();

        assert_eq!(settled(&deferred).await.unwrap(), request());
    }

    #[tokio::test]
    async fn resolve_with_decoded_response() {
        let transport = MockTransport::default();
        transport.reply_with(QUEUE, Duration::ZERO, r#"{"test":"resp"}"#);
        let client = RequestReplyClient::new(transport, QUEUE);

        let deferred = client
            .call_with_timeout::<_, Value>(&request(), Duration::from_secs(10))
            .unwrap();

        assert_eq!(settled(&deferred).await.unwrap(), json!({ "test": "resp" }));
    }

    #[tokio::test]
    async fn fail_on_undecodable_response() {
        let transport = MockTransport::default();
        transport.reply_with(QUEUE, Duration::ZERO, "{{}");
        let client = RequestReplyClient::new(transport, QUEUE);

        let started = tokio::time::Instant::now();
        let deferred = client
            .call_with_timeout::<_, Value>(&request(), Duration::from_secs(10))
            .unwrap();

        let error = settled(&deferred).await.unwrap_err();
        assert!(matches!(error, RequestError::DecodeFailed(_)));
        assert!(error.to_string().contains("Failed decoding"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn fail_on_timeout() {
        let transport = MockTransport::default();
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        let deferred = client
            .call_with_timeout::<_, Value>(&request(), Duration::from_secs_f64(0.1))
            .unwrap();
        let (successes, failures) = count_resolutions(&deferred);

        let error = settled(&deferred).await.unwrap_err();
        assert!(error.is_timeout());
        assert!(error.to_string().contains("Timed out after"));
        assert_eq!(error.to_string(), "Timed out after 0.1s.");

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn release_subscription_and_timer_on_response() {
        let transport = MockTransport::default();
        transport.reply_with(QUEUE, Duration::from_millis(10), r#"{"test":"resp"}"#);
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        let subscriptions_before = transport.subscription_count();
        let timers_before = transport.timer_count();

        let deferred = client
            .call_with_timeout::<_, Value>(&request(), Duration::from_millis(200))
            .unwrap();
        let (successes, failures) = count_resolutions(&deferred);

        assert_eq!(transport.subscription_count(), subscriptions_before + 1);
        assert_eq!(transport.timer_count(), timers_before + 1);

        settled(&deferred).await.unwrap();

        assert_eq!(transport.subscription_count(), subscriptions_before);
        assert_eq!(transport.timer_count(), timers_before);

        // Give a lingering timer every chance to fire
        sleep(Duration::from_millis(300)).await;
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn use_default_timeout() {
        let transport = MockTransport::default();
        let client = RequestReplyClient::new(transport, QUEUE)
            .with_default_timeout(Duration::from_millis(20));

        let deferred = client.call::<_, Value>(&request()).unwrap();

        match settled(&deferred).await {
            Err(RequestError::TimedOut(timeout)) => {
                assert_eq!(timeout, Duration::from_millis(20))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn default_to_two_minutes() {
        let client = RequestReplyClient::new(Arc::new(ChaoticTransport::default()), QUEUE);
        assert_eq!(client.default_timeout(), Duration::from_secs(120));
        assert_eq!(client.destination(), QUEUE);
    }

    #[test]
    fn take_settings_from_options() {
        let options = ClientOptions {
            destination: "sessions".to_string(),
            timeout: Duration::from_secs(5),
        };
        let client = RequestReplyClient::from_options(MockTransport::default(), &options);

        assert_eq!(client.destination(), "sessions");
        assert_eq!(client.default_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn return_encoding_errors_immediately() {
        let transport = Arc::new(ChaoticTransport::default());
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        let error = client.call::<_, Value>(&Unencodable).unwrap_err();

        assert!(matches!(error, RequestError::EncodeFailed(_)));
        assert!(error.to_string().contains("not today"));
        assert!(transport.hints.lock().unwrap().is_empty());
        assert!(transport.timeouts.lock().unwrap().is_empty());
    }

    #[test]
    fn resolve_once_when_reply_precedes_timeout() {
        let transport = Arc::new(ChaoticTransport::default());
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        let deferred = client.call::<_, Value>(&request()).unwrap();
        let (successes, failures) = count_resolutions(&deferred);

        transport.reply(br#"{"test":"resp"}"#);
        transport.expire();
        transport.reply(b"{{}");

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert_eq!(deferred.outcome().unwrap().unwrap(), json!({ "test": "resp" }));
    }

    #[test]
    fn resolve_once_when_timeout_precedes_reply() {
        let transport = Arc::new(ChaoticTransport::default());
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        let deferred = client.call::<_, Value>(&request()).unwrap();
        let (successes, failures) = count_resolutions(&deferred);

        transport.expire();
        transport.reply(br#"{"test":"resp"}"#);

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(deferred.outcome().unwrap().unwrap_err().is_timeout());
    }

    #[test]
    fn never_mistake_listener_panics_for_decode_failures() {
        let transport = Arc::new(ChaoticTransport::default());
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        let deferred = client.call::<_, Value>(&request()).unwrap();
        deferred.callback(|_| panic!("listener exploded"));
        let (successes, failures) = count_resolutions(&deferred);

        let result = catch_unwind(AssertUnwindSafe(|| transport.reply(br#"{"test":"resp"}"#)));
        assert!(result.is_err());

        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(deferred.outcome().unwrap().unwrap(), json!({ "test": "resp" }));
    }

    #[test]
    fn pass_single_reply_hint() {
        let transport = Arc::new(ChaoticTransport::default());
        let client = RequestReplyClient::new(transport.clone(), QUEUE);

        client.call::<_, Value>(&request()).unwrap();

        assert_eq!(
            *transport.hints.lock().unwrap(),
            vec![RequestHints::single_reply()]
        );
    }
}
