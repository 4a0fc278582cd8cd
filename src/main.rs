mod api;
mod bus;
mod cli;
mod config;
mod convo;
mod creds;
mod dispatch;
mod engine;
mod errors;
mod feed;
mod normalize;
mod observe;
mod reply;
mod shipment;
mod utils;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".parse().expect("static filter parses"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli::run().await
}
