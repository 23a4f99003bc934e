//! HTTP transport for the progress API.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;
use url::Url;

use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::error::{ProgressError, ProgressResult};
use crate::fetcher::SnapshotSource;
use crate::types::AssessmentProgress;

mod helpers;
mod http;

use http::HttpBackend;

pub const CLIENT_USER_AGENT: &str = concat!("waypoint-progress/", env!("CARGO_PKG_VERSION"));

/// Client for the assessment progress endpoints.
#[derive(Debug, Clone)]
pub struct ProgressClient {
    http: HttpBackend,
}

impl ProgressClient {
    pub fn new(config: ClientConfig) -> ProgressResult<Self> {
        let token_provider = config
            .token
            .as_ref()
            .map(TokenProvider::static_token)
            .unwrap_or_else(TokenProvider::from_env);

        Self::with_token_provider(config, token_provider)
    }

    pub fn with_token_provider(
        config: ClientConfig,
        token_provider: TokenProvider,
    ) -> ProgressResult<Self> {
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| ProgressError::Transport {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let base_url = Url::parse(&config.url).map_err(|e| ProgressError::Config {
            message: format!("invalid url {:?}: {}", config.url, e),
        })?;

        Ok(Self {
            http: HttpBackend {
                client,
                base_url,
                token_provider,
                config,
            },
        })
    }

    pub fn from_env() -> ProgressResult<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Fetch the current progress snapshot of an assessment.
    pub async fn fetch_snapshot(&self, assessment_id: &str) -> ProgressResult<AssessmentProgress> {
        let url = self.progress_url(assessment_id)?;
        debug!(url = %url, assessment_id, "fetching progress snapshot");

        let body = self.http.get_text(&url, assessment_id).await?;
        helpers::parse_snapshot(&body, assessment_id)
    }

    /// `{base}/assessments/{id}/progress`, with the id percent-encoded.
    fn progress_url(&self, assessment_id: &str) -> ProgressResult<Url> {
        let mut url = self.http.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProgressError::Config {
                message: format!("url {} cannot be used as a base", self.http.base_url),
            })?
            .pop_if_empty()
            .extend(["assessments", assessment_id, "progress"]);
        Ok(url)
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url.as_str()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.http.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.http.token_provider.is_authenticated()
    }
}

#[async_trait]
impl SnapshotSource for ProgressClient {
    async fn fetch_snapshot(&self, assessment_id: &str) -> ProgressResult<AssessmentProgress> {
        ProgressClient::fetch_snapshot(self, assessment_id).await
    }
}
