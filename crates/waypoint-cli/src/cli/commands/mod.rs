use anyhow::Context;
use waypoint_progress::{ClientConfig, ProgressError};

use super::args::{Cli, Command};
use crate::exit_codes::INTERNAL_ERROR;

mod render;
pub mod snapshot;
pub mod watch;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;
    match cli.cmd {
        Command::Snapshot(args) => snapshot::run(args, config).await,
        Command::Watch(args) => watch::run(args, config).await,
    }
}

/// Config file (if any), then `WAYPOINT_*` environment, then flags.
pub fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let base = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    let mut config = base.merge_env();
    if let Some(url) = &cli.url {
        config = config.with_url(url.clone());
    }
    if let Some(token) = &cli.token {
        config = config.with_token(token.clone());
    }
    config.validate().context("invalid client config")?;
    Ok(config)
}

/// Map a failed command to its exit code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ProgressError>()
        .map(ProgressError::exit_code)
        .unwrap_or(INTERNAL_ERROR)
}
