use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::config::Config;
use crate::event::ActionsEvent;
use crate::handler;

#[derive(Parser)]
#[command(name = "cirelay")]
#[command(author, version, about = "GitHub Actions to CI tracking server relay", long_about = None)]
pub struct Cli {
    /// Path to the webhook event payload to process
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: PathBuf,

    /// Workflow run id of this relay invocation
    #[arg(long, env = "GITHUB_RUN_ID")]
    run_id: u64,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;
        config.apply_env_overrides();

        let payload = fs::read_to_string(&self.event_path).with_context(|| {
            format!("Failed to read event payload: {}", self.event_path.display())
        })?;
        let event: ActionsEvent =
            serde_json::from_str(&payload).context("Failed to parse event payload")?;

        info!(
            "Processing '{}' event from {}",
            event.action.as_deref().unwrap_or("<none>"),
            self.event_path.display()
        );

        let tracker = config.tracker_client()?;
        handler::handle_event(&event, &config, &tracker, self.run_id).await?;

        Ok(())
    }
}
