use thiserror::Error;

/// Typed error hierarchy for stallbot.
///
/// Use at module boundaries (feed reads, marketplace API calls, config
/// validation, shipment actions). Internal/leaf functions can continue using
/// `anyhow::Result` — the `Internal` variant allows seamless conversion via
/// the `?` operator.
#[derive(Debug, Error)]
pub enum StallbotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("Credential expired for account {0}")]
    CredentialExpired(String),

    #[error("Shipment error for order {order_id}: {message}")]
    Shipment { order_id: String, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `StallbotError`.
pub type StallbotResult<T> = std::result::Result<T, StallbotError>;

impl StallbotError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::RateLimited { .. } | Self::Shipment { .. } | Self::Internal(_) => true,
            Self::Config(_) | Self::CredentialExpired(_) => false,
        }
    }

    /// Delay hint in seconds, if the remote side provided one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
