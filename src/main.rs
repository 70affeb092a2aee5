mod auth;
mod causes;
mod cli;
mod config;
mod error;
mod event;
mod executor;
mod features;
mod github;
mod handler;
mod mapper;
mod migrate;
mod params;
mod pipeline;
mod poll;
mod poller;
mod scm;
mod test_results;
mod tracker;
mod util;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting cirelay - GitHub Actions event relay");
    cli.execute().await?;

    Ok(())
}
