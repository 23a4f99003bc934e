//! HTTP layer: status mapping and retry.
//!
//! This is the ONLY place for status code handling. client/mod.rs never
//! interprets status codes.

use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::error::{ProgressError, ProgressResult};

use super::helpers::{parse_retry_after, rate_limit_delay};

/// HTTP backend for making requests (holds reqwest client, auth, config).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: Url,
    pub(crate) token_provider: TokenProvider,
    pub(crate) config: ClientConfig,
}

impl HttpBackend {
    /// GET `url` and return the body text, retrying transient failures.
    pub(crate) async fn get_text(&self, url: &Url, assessment_id: &str) -> ProgressResult<String> {
        let response = self
            .request(reqwest::Method::GET, url, assessment_id)
            .await?;
        response.text().await.map_err(|e| ProgressError::Transport {
            message: format!("failed to read response body: {}", e),
        })
    }

    /// Make a request, retrying rate limits and transport failures.
    pub(crate) async fn request(
        &self,
        method: reqwest::Method,
        url: &Url,
        assessment_id: &str,
    ) -> ProgressResult<reqwest::Response> {
        let policy = &self.config.retry;
        let mut retries = 0;

        loop {
            match self.request_once(method.clone(), url, assessment_id).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && policy.allows(retries + 1) => {
                    retries += 1;

                    let backoff = match &e {
                        ProgressError::RateLimited {
                            retry_after: Some(retry_after),
                        } => rate_limit_delay(*retry_after),
                        _ => policy.delay(retries),
                    };

                    warn!(
                        error = %e,
                        url = %url,
                        retry = retries,
                        max_retries = policy.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &self,
        method: reqwest::Method,
        url: &Url,
        assessment_id: &str,
    ) -> ProgressResult<reqwest::Response> {
        let mut request = self.client.request(method, url.clone());

        if let Some(token) = self.token_provider.get_token().await? {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "response received");

        match status {
            s if s.is_success() => Ok(response),

            StatusCode::UNAUTHORIZED => Err(ProgressError::Unauthorized {
                message: "invalid or expired token".to_string(),
            }),

            StatusCode::FORBIDDEN => Err(ProgressError::Unauthorized {
                message: format!("access to assessment {} denied", assessment_id),
            }),

            StatusCode::NOT_FOUND => Err(ProgressError::NotFound {
                assessment_id: assessment_id.to_string(),
            }),

            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                Err(ProgressError::RateLimited { retry_after })
            }

            _ => {
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                let message: String = message.chars().take(200).collect();
                Err(ProgressError::Transport {
                    message: format!("HTTP {}: {}", status.as_u16(), message),
                })
            }
        }
    }
}
