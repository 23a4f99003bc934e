//! Error types for the progress client.

use std::time::Duration;

/// Progress client errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProgressError {
    /// Assessment does not exist.
    #[error("assessment not found: {assessment_id}")]
    NotFound { assessment_id: String },

    /// Caller lacks access or the credential was rejected.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout, or unexpected HTTP status.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Response body could not be decoded.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Update names a domain outside the assessment's known domain set.
    #[error("unknown domain {domain_id} for assessment {assessment_id}")]
    UnknownDomain {
        assessment_id: String,
        domain_id: String,
    },

    /// Update addressed to a different assessment.
    #[error("update for assessment {actual} delivered to {expected}")]
    WrongAssessment { expected: String, actual: String },

    /// Query on an assessment that is not tracked.
    #[error("assessment not tracked: {assessment_id}")]
    NotTracked { assessment_id: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ProgressError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 1,
            Self::NotTracked { .. } => 1,
            Self::Config { .. } => 1,

            Self::Unauthorized { .. } => 2,

            Self::RateLimited { .. } => 5,
            Self::Transport { .. } => 5,

            Self::InvalidResponse { .. } => 6,
            Self::UnknownDomain { .. } => 6,
            Self::WrongAssessment { .. } => 6,
        }
    }

    /// Whether the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }

    /// Whether the error describes a malformed fragment from the source
    /// rather than something the caller can act on.
    pub fn is_data_quality(&self) -> bool {
        matches!(
            self,
            Self::UnknownDomain { .. } | Self::WrongAssessment { .. }
        )
    }
}

impl From<reqwest::Error> for ProgressError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Result type for progress operations.
pub type ProgressResult<T> = Result<T, ProgressError>;
