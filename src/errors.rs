//! Dropbox Error Definitions
//!
//! This module defines all error types for the Dropbox client.
//! Errors are split into transient network failures (the only kind the retry
//! policy will re-attempt), protocol violations, session failures and errors
//! derived from unexpected HTTP status codes.

use thiserror::Error;

/// Result type alias for Dropbox operations
pub type Result<T> = std::result::Result<T, DropboxError>;

/// Longest response body excerpt carried inside a status error
const MAX_BODY_EXCERPT: usize = 512;

/// Base error type for all Dropbox client errors
#[derive(Error, Debug)]
pub enum DropboxError {
    /// Client has been closed
    #[error("Client is closed")]
    ClientClosed,

    /// Invalid argument was provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Connection-level failure (refused, reset, DNS, broken body stream)
    #[error("Network error during {operation} to {url}: {message}")]
    Network {
        operation: String,
        url: String,
        message: String,
    },

    /// Request did not complete within the configured timeout
    #[error("Network timeout during {0}")]
    NetworkTimeout(String),

    /// Server response violates the protocol's consistency rules
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server no longer recognizes the upload session
    #[error("Upload session lost: {0}")]
    SessionLost(String),

    /// Declared byte count differs from what the stream actually produced
    #[error("Size mismatch: expected {expected} bytes but the stream had {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    /// HTTP 400
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// HTTP 401
    #[error("Invalid access token: {0}")]
    InvalidAccessToken(String),

    /// HTTP 500 and 502
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// HTTP 503
    #[error("Server asked to retry later: {0}")]
    RetryLater(String),

    /// Any other status the operation did not anticipate
    #[error("Unexpected HTTP status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DropboxError {
    /// Returns true for failures the retry policy may re-attempt.
    ///
    /// Only network-level failures qualify. Anything the server actually
    /// answered, including 5xx statuses, is returned to the caller as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DropboxError::Network { .. } | DropboxError::NetworkTimeout(_)
        )
    }

    /// HTTP status code carried by status-derived errors
    pub fn status(&self) -> Option<u16> {
        match self {
            DropboxError::BadRequest(_) => Some(400),
            DropboxError::InvalidAccessToken(_) => Some(401),
            DropboxError::RetryLater(_) => Some(503),
            DropboxError::ServerError { status, .. }
            | DropboxError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DropboxError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        Self::from_reqwest(err, url)
    }
}

impl DropboxError {
    /// Classifies a reqwest failure for a request to `url`
    ///
    /// Errors raised while reading a response body do not carry the URL,
    /// so the transport supplies it.
    pub(crate) fn from_reqwest(err: reqwest::Error, url: String) -> Self {
        if err.is_timeout() {
            DropboxError::NetworkTimeout(url)
        } else if err.is_builder() {
            DropboxError::InvalidArgument(err.to_string())
        } else {
            let operation = if err.is_connect() {
                "connect"
            } else if err.is_body() || err.is_decode() {
                "read"
            } else {
                "request"
            };
            DropboxError::Network {
                operation: operation.to_string(),
                url,
                message: err.to_string(),
            }
        }
    }
}

/// Maps a non-success HTTP status and its body to an error
///
/// Callers handle the statuses their endpoint gives meaning to (404 on
/// session calls, 403 on folder creation, ...) before falling back to this.
///
/// Status codes:
///   - 400: Bad request (malformed parameters)
///   - 401: Access token expired or revoked
///   - 500, 502: Server-side failure
///   - 503: Rate limited, retry later
pub fn map_status_to_error(status: u16, body: &[u8]) -> DropboxError {
    let message = body_excerpt(body);
    match status {
        400 => DropboxError::BadRequest(message),
        401 => DropboxError::InvalidAccessToken(message),
        500 | 502 => DropboxError::ServerError { status, message },
        503 => DropboxError::RetryLater(message),
        _ => DropboxError::UnexpectedStatus { status, message },
    }
}

/// Extracts a readable message from an error body
///
/// Dropbox error bodies look like `{"error": "..."}`; when that field is
/// present only its text is kept.
fn body_excerpt(body: &[u8]) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(body) {
        if let Some(serde_json::Value::String(msg)) = map.get("error") {
            return msg.clone();
        }
    }
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_BODY_EXCERPT {
        return text.into_owned();
    }
    let mut end = MAX_BODY_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
