//! Errors surfaced by the price feed and brokerage adapters

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("order rejected ({code}): {message}")]
    OrderRejected { code: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("circuit breaker is open")]
    CircuitBreakerOpen,
}

impl BrokerError {
    /// Network hiccups and server-side failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
