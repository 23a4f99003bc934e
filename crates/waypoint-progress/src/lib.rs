//! Assessment progress client.
//!
//! Follows the progress of multi-domain assessments from a remote service:
//!
//! - HTTP client for the progress snapshot endpoint with token auth
//! - Update subscriptions over polling or pushed channels, with reconnect
//! - Order-independent aggregation keyed on per-domain sequence numbers
//! - Derived stats (percent complete, remaining domains, time estimate)
//! - An in-memory store with change listeners
//!
//! # Quick Start
//!
//! ```no_run
//! use waypoint_progress::{ProgressClient, ProgressFetcher, ProgressStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Create client from environment
//! let client = ProgressClient::from_env()?;
//! let store = ProgressStore::new(ProgressFetcher::polling(client));
//!
//! store.on_change("q3-review", |progress| {
//!     println!("{}: {}", progress.assessment_id(), progress.status());
//!     Ok(())
//! });
//! store.track("q3-review").await?;
//!
//! let stats = store.get_stats("q3-review")?;
//! println!("{}% complete", stats.percent_complete);
//! # Ok(())
//! # }
//! ```
//!
//! # Authentication
//!
//! The client sends a bearer token taken from:
//!
//! - `WAYPOINT_API_TOKEN` environment variable
//! - Explicit token in `ClientConfig`
//! - A custom [`CredentialSource`]
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `WAYPOINT_API_URL` | API base URL (default: `https://api.waypoint.dev/v1`) |
//! | `WAYPOINT_API_TOKEN` | Authentication token |
//! | `WAYPOINT_API_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `WAYPOINT_API_MAX_RETRIES` | Max retries for transient failures (default: 3) |
//! | `WAYPOINT_POLL_INTERVAL_MS` | Polling interval in milliseconds (default: 5000) |
//! | `WAYPOINT_MAX_RECONNECTS` | Reconnect attempts before degrading (default: 5) |

pub mod aggregate;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod stats;
pub mod store;
pub mod types;

// Re-export main types
pub use aggregate::{apply, overall_status, reduce, Reduced};
pub use auth::{CredentialSource, TokenProvider};
pub use client::{ProgressClient, CLIENT_USER_AGENT};
pub use config::ClientConfig;
pub use error::{ProgressError, ProgressResult};
pub use fetcher::{
    snapshot_fragments, BackoffPolicy, ChannelProvider, PollingProvider, ProgressFetcher,
    PushProvider, SnapshotSource, SubscriptionHandle, UpdateChannel,
};
pub use stats::{derive_stats, Estimator};
pub use store::{Listener, ListenerId, ProgressStore, StoreConfig, TrackState};
pub use types::{AssessmentProgress, DomainProgress, DomainStatus, ProgressStats, ProgressUpdate};
