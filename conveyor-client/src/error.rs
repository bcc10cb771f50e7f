//! Error types for the Conveyor client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Conveyor client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    ///
    /// Displays as the underlying reqwest error, whose causes stay reachable
    /// through `source()`.
    #[error(transparent)]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create an API error from a raw response body
    ///
    /// The orchestrator answers errors with `{"error": "..."}`; anything else
    /// is kept verbatim.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.to_string());

        Self::api_error(status, message)
    }

    /// Message returned by the API, if any
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Self::ApiError { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if the request was refused because of the resource's current state
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ApiError { status: 409, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_body() {
        let err = ClientError::from_body(409, r#"{"error":"run is not awaiting approval"}"#);
        assert!(err.is_conflict());
        assert!(err.is_client_error());
        assert_eq!(err.api_message(), Some("run is not awaiting approval"));
    }

    #[test]
    fn test_from_plain_body() {
        let err = ClientError::from_body(502, "Bad Gateway");
        assert!(err.is_server_error());
        assert_eq!(err.api_message(), Some("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_request_error_message_is_not_repeated() {
        let err: ClientError = reqwest::get("not a url").await.unwrap_err().into();
        let message = err.to_string();

        let ClientError::RequestFailed(inner) = &err else {
            panic!("expected a request error");
        };
        assert_eq!(message, inner.to_string());

        let cause = std::error::Error::source(&err).map(|s| s.to_string());
        assert_ne!(cause.as_deref(), Some(message.as_str()));
    }
}
