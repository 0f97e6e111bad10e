use super::{RESPONSE_KEY_PREFIX, STREAM_ID_NEW, STREAM_PAYLOAD_KEY, STREAM_REPLY_TO_KEY};
use crate::library::communication::transport::{
    CorrelationHandle, CorrelationRegistry, Delivery, ReplyHandler, RequestHints, TimeoutHandler,
    Transport,
};
use crate::options::RedisOptions;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamMaxlen;
use redis::{AsyncCommands, Client, RedisResult};
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Seconds a single `BLPOP` blocks before it is reissued
const REPLY_POLL_INTERVAL: usize = 1;

/// Approximate number of entries retained per destination stream
pub const DEFAULT_STREAM_LIMIT: usize = 1000;

/// Request/reply transport backed by a redis server
///
/// Requests are published with [`XADD`](https://redis.io/commands/xadd) over a shared multiplexed
/// connection. Replies are collected with [`BLPOP`](https://redis.io/commands/blpop) over a dedicated
/// connection per request, since blocking commands would stall every other user of a shared one.
/// Failures on either side are logged and leave the request to its deadline.
///
/// Once a request is finished, either by its reply or its deadline, the reply list is deleted.
/// Replies pushed after that point recreate the list, so responders should put a TTL on it.
#[derive(Clone)]
pub struct RedisTransport {
    client: Client,
    publisher: MultiplexedConnection,
    registry: CorrelationRegistry,
    stream_limit: usize,
}

impl RedisTransport {
    /// Connects to the redis server at the given url
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let publisher = client.get_multiplexed_tokio_connection().await?;

        debug!(url, "Connected to redis");

        Ok(Self {
            client,
            publisher,
            registry: CorrelationRegistry::default(),
            stream_limit: DEFAULT_STREAM_LIMIT,
        })
    }

    /// Connects to the redis server referenced by the options
    pub async fn from_options(options: &RedisOptions) -> RedisResult<Self> {
        Self::connect(&options.url).await
    }

    /// Overrides the approximate number of entries retained per destination stream
    pub fn with_stream_limit(mut self, limit: usize) -> Self {
        self.stream_limit = limit;
        self
    }

    /// Number of correlations awaiting replies
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }
}

impl Transport for RedisTransport {
    fn request(
        &self,
        destination: &str,
        payload: Vec<u8>,
        hints: RequestHints,
        on_reply: ReplyHandler,
    ) -> CorrelationHandle {
        let handle = CorrelationHandle::new(Uuid::new_v4().to_string());
        self.registry.register(handle.clone(), hints, on_reply);

        let worker = tokio::spawn(exchange(
            self.client.clone(),
            self.publisher.clone(),
            self.registry.clone(),
            handle.clone(),
            destination.to_owned(),
            payload,
            self.stream_limit,
        ));

        self.registry.attach_worker(&handle, worker);

        handle
    }

    fn timeout(&self, handle: &CorrelationHandle, duration: Duration, on_timeout: TimeoutHandler) {
        let connection = self.publisher.clone();
        let key = response_key(handle);
        let on_timeout = with_cleanup(on_timeout, move || {
            tokio::spawn(discard_replies(connection, key));
        });

        self.registry.schedule_timeout(handle, duration, on_timeout)
    }
}

fn response_key(handle: &CorrelationHandle) -> String {
    format!("{}{}", RESPONSE_KEY_PREFIX, handle)
}

/// Runs the cleanup before handing control to the original handler
fn with_cleanup<F>(on_timeout: TimeoutHandler, cleanup: F) -> TimeoutHandler
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        cleanup();
        on_timeout();
    })
}

async fn discard_replies(mut con: MultiplexedConnection, key: String) {
    match con.del::<_, ()>(&key).await {
        Ok(()) => trace!(%key, "Discarded reply list"),
        Err(error) => warn!(%error, %key, "Failed to discard reply list"),
    }
}

async fn exchange(
    client: Client,
    mut publisher: MultiplexedConnection,
    registry: CorrelationRegistry,
    handle: CorrelationHandle,
    destination: String,
    payload: Vec<u8>,
    stream_limit: usize,
) {
    let fields: [(&str, &[u8]); 2] = [
        (STREAM_PAYLOAD_KEY, &payload),
        (STREAM_REPLY_TO_KEY, handle.as_str().as_bytes()),
    ];

    let published = publisher
        .xadd_maxlen::<_, _, _, _, ()>(
            &destination,
            StreamMaxlen::Approx(stream_limit),
            STREAM_ID_NEW,
            &fields,
        )
        .await;

    if let Err(error) = published {
        warn!(%error, correlation = %handle, %destination, "Failed to publish request");
        return;
    }

    trace!(correlation = %handle, %destination, "Published request");

    if let Err(error) = collect(&client, publisher, &registry, &handle).await {
        warn!(%error, correlation = %handle, "Failed to collect replies");
    }
}

async fn collect(
    client: &Client,
    publisher: MultiplexedConnection,
    registry: &CorrelationRegistry,
    handle: &CorrelationHandle,
) -> RedisResult<()> {
    let mut con = client.get_async_connection().await?;
    let key = response_key(handle);

    loop {
        let reply = con
            .blpop::<_, Option<(String, Vec<u8>)>>(&key, REPLY_POLL_INTERVAL)
            .await?;

        if let Some((_, reply)) = reply {
            if registry.deliver(handle, reply) != Delivery::Accepting {
                // This task has been aborted by the release, cleanup runs on its own
                tokio::spawn(discard_replies(publisher, key));
                return Ok(());
            }
        }
    }
}
