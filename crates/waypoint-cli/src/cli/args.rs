use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "waypoint",
    version,
    about = "Follow assessment progress from the terminal"
)]
pub struct Cli {
    /// API base URL
    #[arg(long, global = true, env = "WAYPOINT_API_URL")]
    pub url: Option<String>,

    /// Bearer token for the progress API
    #[arg(long, global = true, env = "WAYPOINT_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// YAML client config; flags and environment override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch and print the current progress of an assessment
    Snapshot(SnapshotArgs),
    /// Follow an assessment until it completes
    Watch(WatchArgs),
}

#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    pub assessment_id: String,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    pub assessment_id: String,

    /// Override the polling interval
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Evict the assessment this many seconds after completion
    #[arg(long)]
    pub terminal_grace_secs: Option<u64>,

    /// Print one JSON object per change
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot() {
        let cli = Cli::try_parse_from(["waypoint", "snapshot", "q3-review", "--json"]).unwrap();
        match cli.cmd {
            Command::Snapshot(args) => {
                assert_eq!(args.assessment_id, "q3-review");
                assert!(args.json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_parse_watch_with_global_flags() {
        let cli = Cli::try_parse_from([
            "waypoint",
            "watch",
            "A1",
            "--poll-interval-ms",
            "250",
            "--url",
            "http://localhost:8080/v1",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.cmd {
            Command::Watch(args) => {
                assert_eq!(args.assessment_id, "A1");
                assert_eq!(args.poll_interval_ms, Some(250));
                assert!(!args.json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_assessment_id_required() {
        assert!(Cli::try_parse_from(["waypoint", "watch"]).is_err());
    }
}
