//! [`Transport`](super::super::transport::Transport) implementation using [`redis`](::redis)
//!
//! Requests are appended to a [stream](https://redis.io/topics/streams-intro) named after their
//! destination. Each entry carries the encoded request in its `payload` field and the key suffix
//! under which replies are expected in its `reply_to` field. Responders push their replies onto
//! the [list](https://redis.io/topics/data-types#lists) `response.<reply_to>`.

const RESPONSE_KEY_PREFIX: &str = "response.";
const STREAM_PAYLOAD_KEY: &str = "payload";
const STREAM_REPLY_TO_KEY: &str = "reply_to";
const STREAM_ID_NEW: &str = "*";

mod transport;

pub use transport::*;
