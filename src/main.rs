// farmlink - command line client for the farm marketplace
// Loads config, opens the local store and runs one command.

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use farmlink::app::Marketplace;
use farmlink::cli::{dispatch, Cli};
use farmlink::config::load_config;
use farmlink::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("loading configuration")?;
    debug!(storage = %config.storage_path.display(), "configuration loaded");

    let market = Marketplace::from_config(&config).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    dispatch(cli, &market).await
}
