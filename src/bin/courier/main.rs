use anyhow::{Context, Result};
use courier::library::communication::implementation::redis::RedisTransport;
use courier::library::communication::request::{RequestReplyClient, SynchronousCallAdapter};
use options::{Command, LogFormat, MainOptions, RequestOptions};
use serde_json::Value;
use structopt::StructOpt;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let command = init();

    match command {
        Command::Request(options) => request(options).await,
    }
}

fn init() -> Command {
    let options = MainOptions::from_args();

    let formatter = tracing_subscriber::fmt()
        .with_env_filter(options.log)
        .with_writer(std::io::stderr);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    options.command
}

async fn request(options: RequestOptions) -> Result<()> {
    let payload: Value =
        serde_json::from_str(&options.payload).context("Request is not a valid JSON document")?;

    let transport = RedisTransport::from_options(&options.redis)
        .await
        .with_context(|| format!("Unable to connect to {}", options.redis.url))?;

    let client = RequestReplyClient::from_options(transport, &options.client);
    let adapter = SynchronousCallAdapter::new(client);

    info!(destination = %options.client.destination, "Sending request");
    let response: Value = adapter.call(&payload).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
