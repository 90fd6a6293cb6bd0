//! Client error taxonomy.
//!
//! DESIGN
//! ======
//! Auth-related failures (`Unauthorized`, `RefreshFailed`, `RefreshRejected`,
//! `MissingRefreshToken`, `SessionChanged`) are resolved locally by the
//! session layer before they reach callers. Everything else (`Network`,
//! `Api`, `Validation`) propagates unchanged for the UI to present.

use crate::storage::StorageError;

/// Errors produced by the API client, session store, and realtime client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered 401 and the request could not be recovered.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The refresh call issued on behalf of a 401 failed.
    #[error("session refresh failed: {0}")]
    RefreshFailed(Box<ClientError>),

    /// The request was queued behind a refresh that did not produce a token.
    #[error("request dropped: pending session refresh failed")]
    RefreshRejected,

    /// A refresh was requested without a refresh token.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// The session was cleared or replaced while a refresh was in flight.
    #[error("session changed while refresh was in flight")]
    SessionChanged,

    /// The server rejected the request payload (400/422).
    #[error("validation failed (HTTP {status}): {message}")]
    Validation { status: u16, message: String },

    /// The server returned any other non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The HTTP request could not be sent or its body could not be read.
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// A response body did not match the expected shape.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Persisting or removing tokens failed.
    #[error("token storage failed: {0}")]
    Storage(#[from] StorageError),

    /// The realtime URL could not be converted to a WebSocket URL.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The credential could not be encoded as a header value.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    /// The WebSocket handshake or transport failed.
    #[error("websocket failed: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

impl ClientError {
    /// Classify a non-success HTTP response.
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = response_message(body);
        match status {
            401 => Self::Unauthorized { message },
            400 | 422 => Self::Validation { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Stable machine-readable code for logs and the CLI.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "E_UNAUTHORIZED",
            Self::RefreshFailed(_) => "E_REFRESH_FAILED",
            Self::RefreshRejected => "E_REFRESH_REJECTED",
            Self::MissingRefreshToken => "E_MISSING_REFRESH_TOKEN",
            Self::SessionChanged => "E_SESSION_CHANGED",
            Self::Validation { .. } => "E_VALIDATION",
            Self::Api { .. } => "E_API",
            Self::Network(_) => "E_NETWORK",
            Self::InvalidJson(_) => "E_INVALID_JSON",
            Self::Storage(_) => "E_STORAGE",
            Self::InvalidBaseUrl(_) => "E_INVALID_BASE_URL",
            Self::InvalidHeader(_) => "E_INVALID_HEADER",
            Self::WebSocket(_) => "E_WEBSOCKET",
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
        }
    }

    /// Whether repeating the same call later could succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::WebSocket(_) | Self::Api { status: 429 | 500..=599, .. })
    }

    /// Whether this failure belongs to the auth/refresh family.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. }
                | Self::RefreshFailed(_)
                | Self::RefreshRejected
                | Self::MissingRefreshToken
                | Self::SessionChanged
                | Self::NotAuthenticated
        )
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Validation { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// Servers answer with `{"message": "..."}` or, for validation errors,
/// `{"message": ["...", "..."]}`. Anything else falls back to the raw text.
fn response_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_owned();
    };

    match value.get("message") {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter_map(serde_json::Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => value.to_string(),
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
