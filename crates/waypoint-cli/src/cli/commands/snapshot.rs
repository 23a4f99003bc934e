use anyhow::{Context, Result};
use waypoint_progress::{derive_stats, ClientConfig, ProgressClient};

use super::render;
use crate::cli::args::SnapshotArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: SnapshotArgs, config: ClientConfig) -> Result<i32> {
    let client = ProgressClient::new(config).context("failed to create progress client")?;
    let progress = client
        .fetch_snapshot(&args.assessment_id)
        .await
        .with_context(|| format!("fetching progress for {}", args.assessment_id))?;

    render::print(&progress, &derive_stats(&progress, None), args.json)?;
    Ok(SUCCESS)
}
