//! Bearer credentials for the progress API.
//!
//! The client only attaches whatever token it is handed. Sign-in, refresh
//! and storage belong to the authentication service, which plugs in through
//! [`CredentialSource`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProgressResult;

/// Supplies the current bearer token, e.g. from an auth service session.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current token, or `None` when signed out.
    async fn bearer_token(&self) -> ProgressResult<Option<String>>;
}

/// Token provider for API authentication.
#[derive(Clone)]
pub enum TokenProvider {
    /// Static token (from config or env).
    Static(String),

    /// No authentication.
    None,

    /// Token obtained from an external credential source on every request.
    Source(Arc<dyn CredentialSource>),
}

impl TokenProvider {
    /// Create a static token provider.
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    /// Wrap an external credential source.
    pub fn source(source: impl CredentialSource + 'static) -> Self {
        Self::Source(Arc::new(source))
    }

    /// Create from `WAYPOINT_API_TOKEN`, falling back to no auth.
    pub fn from_env() -> Self {
        match std::env::var("WAYPOINT_API_TOKEN") {
            Ok(token) if !token.is_empty() => Self::Static(token),
            _ => Self::None,
        }
    }

    /// Get the current token.
    pub async fn get_token(&self) -> ProgressResult<Option<String>> {
        match self {
            Self::Static(token) => Ok(Some(token.clone())),
            Self::None => Ok(None),
            Self::Source(source) => source.bearer_token().await,
        }
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Default for TokenProvider {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(<redacted>)"),
            Self::None => f.write_str("None"),
            Self::Source(_) => f.write_str("Source(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProgressError;
    use serial_test::serial;

    struct SessionTokens {
        token: Option<&'static str>,
    }

    #[async_trait]
    impl CredentialSource for SessionTokens {
        async fn bearer_token(&self) -> ProgressResult<Option<String>> {
            Ok(self.token.map(String::from))
        }
    }

    struct Expired;

    #[async_trait]
    impl CredentialSource for Expired {
        async fn bearer_token(&self) -> ProgressResult<Option<String>> {
            Err(ProgressError::Unauthorized {
                message: "session expired".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = TokenProvider::static_token("abc");
        assert!(provider.is_authenticated());
        assert_eq!(provider.get_token().await.unwrap(), Some("abc".into()));
    }

    #[tokio::test]
    async fn test_no_auth() {
        let provider = TokenProvider::None;
        assert!(!provider.is_authenticated());
        assert_eq!(provider.get_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_credential_source() {
        let provider = TokenProvider::source(SessionTokens {
            token: Some("session-1"),
        });
        assert_eq!(
            provider.get_token().await.unwrap(),
            Some("session-1".into())
        );

        let signed_out = TokenProvider::source(SessionTokens { token: None });
        assert_eq!(signed_out.get_token().await.unwrap(), None);

        let expired = TokenProvider::source(Expired);
        assert!(matches!(
            expired.get_token().await,
            Err(ProgressError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let provider = TokenProvider::static_token("super-secret");
        assert!(!format!("{:?}", provider).contains("super-secret"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("WAYPOINT_API_TOKEN", "env-token");
        assert!(matches!(TokenProvider::from_env(), TokenProvider::Static(t) if t == "env-token"));

        std::env::set_var("WAYPOINT_API_TOKEN", "");
        assert!(matches!(TokenProvider::from_env(), TokenProvider::None));

        std::env::remove_var("WAYPOINT_API_TOKEN");
        assert!(matches!(TokenProvider::from_env(), TokenProvider::None));
    }
}
