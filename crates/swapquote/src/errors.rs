use serde::Serialize;
use thiserror::Error;

/// A structured error suitable for publishing to engine subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub code: &'static str,
    pub message: String,
}

impl ErrorSummary {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("malformed response from {provider}: {reason}")]
    MalformedProviderResponse { provider: String, reason: String },

    #[error("quote transport failed: {0}")]
    TransportFailure(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid gas parameters: {0}")]
    InvalidGasParameters(String),

    #[error("no quote from provider {0} in the current set")]
    UnknownProvider(String),

    #[error("quote engine is shut down")]
    EngineClosed,
}

impl QuoteError {
    pub fn malformed(provider: &str, reason: impl Into<String>) -> Self {
        Self::MalformedProviderResponse {
            provider: provider.to_owned(),
            reason: reason.into(),
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::MalformedProviderResponse { .. } => "malformed_provider_response",
            Self::TransportFailure(_) => "transport_failure",
            Self::Cancelled => "cancelled",
            Self::InvalidGasParameters(_) => "invalid_gas_parameters",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::EngineClosed => "engine_closed",
        }
    }

    /// Cancellation is expected and never surfaced to users.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<QuoteError> for ErrorSummary {
    fn from(e: QuoteError) -> Self {
        let code = e.code();
        Self::new(code, e.to_string())
    }
}
