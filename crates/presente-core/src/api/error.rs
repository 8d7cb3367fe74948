use thiserror::Error;

use crate::storage::StoreError;

/// `detail` value the API returns with a 403 once the access token has expired.
pub const EXPIRED_TOKEN_DETAIL: &str = "Given token not valid for any token type";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Access token expired")]
    TokenExpired,

    #[error("Session refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Session ended while the request was in flight")]
    SessionEnded,

    #[error("Refresh was abandoned before completing")]
    RefreshAbandoned,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("No profile selected")]
    NoProfileSelected,

    #[error("Request cannot be replayed")]
    RequestNotReplayable,

    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// The message the server put in an error body: `msg`, then `detail`,
    /// then the body itself.
    pub fn server_message(body: &str) -> String {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
            for field in ["msg", "detail"] {
                if let Some(serde_json::Value::String(message)) = map.get(field) {
                    return message.clone();
                }
            }
        }
        Self::truncate_body(body.trim())
    }

    /// True when a 403 body carries the expired-token signature
    pub fn is_expired_token_body(body: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(|d| d == EXPIRED_TOKEN_DETAIL))
            .unwrap_or(false)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::server_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 if Self::is_expired_token_body(body) => ApiError::TokenExpired,
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            code @ 400..=499 => ApiError::Rejected { status: code, message },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Copy of this error for callers that were queued behind a refresh.
    pub(crate) fn for_waiter(&self) -> Self {
        match self {
            ApiError::SessionEnded => ApiError::SessionEnded,
            ApiError::NotAuthenticated => ApiError::NotAuthenticated,
            other => ApiError::RefreshFailed(other.to_string()),
        }
    }

    /// True when the user has to sign in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            ApiError::TokenExpired
                | ApiError::RefreshFailed(_)
                | ApiError::SessionEnded
                | ApiError::NotAuthenticated
        )
    }

    /// Text a screen shows for this error
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { message, .. }
            | ApiError::AccessDenied(message)
            | ApiError::Unauthorized(message)
            | ApiError::NotFound(message) => message.clone(),
            ApiError::NetworkError(e) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            ApiError::NetworkError(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::ServerError(_) => "The server had a problem. Please try again later.".to_string(),
            e if e.requires_login() => "Your session has ended. Please sign in again.".to_string(),
            other => other.to_string(),
        }
    }
}
