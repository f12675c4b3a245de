//! Error types for the Entra ID connector.

use reqwest::StatusCode;
use thiserror::Error;
use xavyo_reconcile::error::DirectoryError;

/// Result type alias using `EntraError`.
pub type EntraResult<T> = Result<T, EntraError>;

/// Graph error codes that mean the addressed object does not exist.
const NOT_FOUND_CODES: &[&str] = &["Request_ResourceNotFound", "ResourceNotFound", "itemNotFound"];

/// Errors that can occur when interacting with Entra ID.
#[derive(Debug, Error)]
pub enum EntraError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OAuth2` authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Microsoft Graph API error.
    #[error("Graph API error ({status}): {code} - {message}")]
    GraphApi {
        status: u16,
        code: String,
        message: String,
        inner_error: Option<String>,
    },

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Throttling or gateway errors outlived the retry budget.
    #[error("Maximum retries ({attempts}) exceeded, last status {status}")]
    MaxRetriesExceeded { attempts: u32, status: u16 },

    /// The response did not have the expected shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl EntraError {
    /// Check if the error reports a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::GraphApi { status, code, .. } => {
                *status == StatusCode::NOT_FOUND.as_u16() || NOT_FOUND_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }

    /// Check if the error is a temporary condition.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::GraphApi { status, .. } => is_transient_status(*status),
            Self::MaxRetriesExceeded { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Check if Graph refused to add a reference that already exists.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::GraphApi { status, message, .. } => {
                *status == StatusCode::BAD_REQUEST.as_u16()
                    && message.contains("added object references already exist")
            }
            _ => false,
        }
    }

    /// Convert into the directory collaborator error for `object_id`.
    #[must_use]
    pub fn into_directory_error(self, object_id: &str) -> DirectoryError {
        if self.is_not_found() {
            return DirectoryError::not_found(object_id);
        }
        if self.is_already_exists() {
            return DirectoryError::AlreadyExists {
                object_id: object_id.to_string(),
            };
        }
        if self.is_transient() {
            return DirectoryError::Transient {
                message: self.to_string(),
                source: Some(Box::new(self)),
            };
        }
        match self {
            Self::GraphApi { code, message, .. } => DirectoryError::Rejected {
                code: Some(code),
                message,
            },
            other => DirectoryError::rejected(other.to_string()),
        }
    }
}

/// Status codes retried at the transport boundary.
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}
