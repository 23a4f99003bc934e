use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use waypoint_progress::{
    derive_stats, ClientConfig, ProgressClient, ProgressFetcher, ProgressStore, StoreConfig,
    TrackState,
};

use super::render;
use crate::cli::args::WatchArgs;
use crate::exit_codes::{DEGRADED, INTERRUPTED, SUCCESS};

const HEALTH_CHECK: Duration = Duration::from_secs(1);

pub async fn run(args: WatchArgs, mut config: ClientConfig) -> Result<i32> {
    if let Some(ms) = args.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    if let Some(secs) = args.terminal_grace_secs {
        config = config.with_terminal_grace(Duration::from_secs(secs));
    }
    config.validate().context("invalid client config")?;

    let store_config = StoreConfig::from(&config);
    let client = ProgressClient::new(config).context("failed to create progress client")?;
    let store = ProgressStore::with_config(ProgressFetcher::polling(client), store_config);
    let id = args.assessment_id.as_str();

    let (tx, mut rx) = mpsc::unbounded_channel();
    store.on_change(id, move |progress| {
        tx.send(progress.clone())?;
        Ok(())
    });

    let handle = store
        .track(id)
        .await
        .with_context(|| format!("tracking assessment {}", id))?;

    render::print(&store.get_current(id)?, &store.get_stats(id)?, args.json)?;
    if store.state(id)? == TrackState::Terminal {
        return Ok(SUCCESS);
    }

    let mut health = tokio::time::interval(HEALTH_CHECK);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping watch.");
                store.untrack(id);
                return Ok(INTERRUPTED);
            }
            Some(progress) = rx.recv() => {
                render::print(&progress, &derive_stats(&progress, None), args.json)?;
                if progress.is_complete() {
                    info!(assessment_id = id, "assessment complete");
                    return Ok(SUCCESS);
                }
            }
            _ = health.tick() => {
                if handle.is_degraded() {
                    eprintln!(
                        "Lost the update stream for {}; last known progress is shown above.",
                        id
                    );
                    return Ok(DEGRADED);
                }
            }
        }
    }
}
