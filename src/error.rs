//! Coachway error types

use std::time::Duration;

use serde::Serialize;

/// Coachway error types.
///
/// `Clone` so that a single failed fetch can be delivered verbatim to every
/// caller joined on the same in-flight operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoachwayError {
    // Transport errors (transient)
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    // Session errors
    /// Raw 401 from the provider. Never reaches a consumer: the orchestrator
    /// either refreshes and replays, or converts it to `AuthenticationRequired`.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    // Provider rejections (terminal)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<CoachwayError>,
    },

    // Data errors
    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Local errors
    #[error("token storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoachwayError {
    /// Whether the failure is worth retrying for an idempotent read.
    ///
    /// No response (network, timeout), 5xx and 429 are transient. Everything
    /// else, including 401, is permanent from the retry policy's viewpoint.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// Provider-supplied `Retry-After` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this is a raw 401 that should go through refresh-and-replay.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Whether the consumer must send the user back to a login entry point.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::AuthenticationRequired(_) | Self::Unauthorized(_))
    }

    /// HTTP status associated with the failure, if one was received.
    ///
    /// For `RetriesExhausted` this is the status of the last attempt.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Unauthorized(_) | Self::AuthenticationRequired(_) => Some(401),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Normalise into the single shape consumers branch on.
    pub fn to_client_error(&self) -> ClientError {
        ClientError::from(self)
    }
}

impl From<serde_json::Error> for CoachwayError {
    fn from(err: serde_json::Error) -> Self {
        CoachwayError::Decode(err.to_string())
    }
}

/// Provider-agnostic error shape handed to UI code.
///
/// `message` is the provider's own message for business rejections, so it
/// can be shown as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub requires_login: bool,
}

impl From<&CoachwayError> for ClientError {
    fn from(err: &CoachwayError) -> Self {
        let message = match err {
            CoachwayError::Api { message, .. }
            | CoachwayError::Server { message, .. }
            | CoachwayError::RateLimited { message, .. }
            | CoachwayError::Unauthorized(message)
            | CoachwayError::AuthenticationRequired(message) => message.clone(),
            CoachwayError::RetriesExhausted { last, .. } => ClientError::from(last.as_ref()).message,
            other => other.to_string(),
        };
        Self {
            message,
            code: err.status(),
            requires_login: err.requires_login(),
        }
    }
}

impl From<CoachwayError> for ClientError {
    fn from(err: CoachwayError) -> Self {
        ClientError::from(&err)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result type alias for Coachway operations
pub type Result<T> = std::result::Result<T, CoachwayError>;
