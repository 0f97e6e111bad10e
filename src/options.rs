//! Command line options shared by binaries

use crate::library::helpers::parse_seconds;
use std::time::Duration;
use structopt::StructOpt;

/// Connection details of a redis server
#[derive(Debug, StructOpt)]
pub struct RedisOptions {
    /// Redis database server URL
    #[structopt(
        short = "r",
        long = "redis",
        env = "REDIS",
        default_value = "redis://127.0.0.1/",
        value_name = "url"
    )]
    pub url: String,
}

/// Parameters of a request/reply client
#[derive(Debug, StructOpt)]
pub struct ClientOptions {
    /// Destination requests are published to
    #[structopt(short, long, env, value_name = "name")]
    pub destination: String,

    /// Seconds to wait for a reply before giving up
    #[structopt(
        short,
        long,
        env,
        default_value = "120",
        parse(try_from_str = parse_seconds),
        value_name = "seconds"
    )]
    pub timeout: Duration,
}
