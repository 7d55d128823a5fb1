//! Error kinds surfaced by the token lifecycle

/// Persistence failure in one of the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

/// Failure of a lifecycle operation.
///
/// Precondition failures (`Configuration`, `Authorization`, `NoRefreshToken`,
/// `NotFound`) are raised before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Configuration required: {0}")]
    Configuration(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Token exchange failed: {description}")]
    TokenExchange {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// Provider's `error_description`, or the best substitute available.
        description: String,
    },

    #[error("No refresh token available. Please re-authenticate to get a new refresh token.")]
    NoRefreshToken,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Token {0} not found")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl LifecycleError {
    /// Stable kind name rendered to callers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Configuration(_) => "ConfigurationError",
            LifecycleError::Authorization(_) => "AuthorizationError",
            LifecycleError::TokenExchange { .. } => "TokenExchangeError",
            LifecycleError::NoRefreshToken => "NoRefreshTokenError",
            LifecycleError::Network(_) => "NetworkError",
            LifecycleError::NotFound(_) => "NotFoundError",
            LifecycleError::Storage(_) => "StorageError",
        }
    }
}

impl From<reqwest::Error> for LifecycleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LifecycleError::Network(format!("request timed out: {e}"))
        } else {
            LifecycleError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(
            LifecycleError::Configuration("x".into()).kind(),
            "ConfigurationError"
        );
        assert_eq!(LifecycleError::NoRefreshToken.kind(), "NoRefreshTokenError");
        assert_eq!(LifecycleError::NotFound("7".into()).kind(), "NotFoundError");
    }

    #[test]
    fn test_token_exchange_message_carries_description() {
        let err = LifecycleError::TokenExchange {
            status: 400,
            description: "AADSTS70008: The provided authorization code has expired.".into(),
        };
        assert_eq!(
            err.to_string(),
            "Token exchange failed: AADSTS70008: The provided authorization code has expired."
        );
    }
}
