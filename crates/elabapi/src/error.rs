//! Error types for API operations.
//!
//! Errors are categorized so that transient failures can be retried and
//! users get advice matching the failure.

use std::fmt;

use reconcile::RemoteError;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of API errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection failures, timeouts, rate limiting and server errors.
    Network,
    /// Missing or rejected API key.
    Auth,
    /// Entity or endpoint not found.
    NotFound,
    /// Request rejected by the server.
    Client,
    /// Unexpected response shape.
    Format,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::Auth => "Authentication failed",
            Self::NotFound => "Entity not found",
            Self::Client => "Request rejected",
            Self::Format => "Unexpected response",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check the host URL and your connection, then try again",
            Self::Auth => "Check the API key of the active profile and its write access",
            Self::NotFound => "The entity may have been deleted; run plan again",
            Self::Client => "Check the manifest values against the server's constraints",
            Self::Format => "The host URL may not point to an eLabFTW instance",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to the API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        message: String,
        /// HTTP status code if the server answered.
        status: Option<u16>,
    },

    /// Response body could not be decoded.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// Create succeeded but the new id could not be read.
    #[error("no entity id in the Location header of {0}")]
    MissingLocation(String),

    /// Client configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    /// HTTP status code if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Http { status, .. } => match status {
                None | Some(429 | 500..=599) => ErrorCategory::Network,
                Some(401 | 403) => ErrorCategory::Auth,
                Some(404) => ErrorCategory::NotFound,
                Some(_) => ErrorCategory::Client,
            },
            Error::InvalidResponse(_) | Error::MissingLocation(_) => ErrorCategory::Format,
            Error::Config(_) | Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        400 => "bad request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not found",
        409 => "conflict",
        422 => "unprocessable entity",
        429 => "too many requests",
        500..=599 => "server error",
        _ => "unexpected status",
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: reason(code).to_string(),
                status: Some(code),
            },
            ureq::Error::Json(err) => Self::InvalidResponse(err.to_string()),
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl From<Error> for RemoteError {
    fn from(err: Error) -> Self {
        match err {
            Error::Http {
                message,
                status: Some(code),
            } => RemoteError::with_status(code, message),
            other => RemoteError::new(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Client.is_retryable());
        assert!(!ErrorCategory::Format.is_retryable());
        assert!(!ErrorCategory::Other.is_retryable());
    }

    #[test]
    fn test_error_category_text() {
        assert!(!ErrorCategory::Auth.description().is_empty());
        assert!(!ErrorCategory::Auth.advice().is_empty());
        assert!(format!("{}", ErrorCategory::Network).contains("Network"));
    }

    #[test]
    fn test_http_status_categories() {
        assert_eq!(Error::http("x", None).category(), ErrorCategory::Network);
        assert_eq!(Error::http("x", Some(503)).category(), ErrorCategory::Network);
        assert_eq!(Error::http("x", Some(429)).category(), ErrorCategory::Network);
        assert_eq!(Error::http("x", Some(401)).category(), ErrorCategory::Auth);
        assert_eq!(Error::http("x", Some(403)).category(), ErrorCategory::Auth);
        assert_eq!(Error::http("x", Some(404)).category(), ErrorCategory::NotFound);
        assert_eq!(Error::http("x", Some(422)).category(), ErrorCategory::Client);
        assert!(Error::http("x", Some(502)).is_retryable());
        assert!(!Error::http("x", Some(400)).is_retryable());
    }

    #[test]
    fn test_from_ureq_status() {
        let err: Error = ureq::Error::StatusCode(404).into();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP request failed: not found");
    }

    #[test]
    fn test_into_remote_error() {
        let remote: RemoteError = Error::http("forbidden", Some(403)).into();
        assert_eq!(remote, RemoteError::with_status(403, "forbidden"));
        assert_eq!(remote.to_string(), "forbidden (HTTP 403)");

        let remote: RemoteError = Error::MissingLocation("POST /items".into()).into();
        assert_eq!(remote.status, None);
        assert!(remote.message.contains("Location"));
    }

    #[test]
    fn test_format_errors() {
        let json_err = serde_json::from_str::<u64>("nope").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.category(), ErrorCategory::Format);
        assert_eq!(err.status(), None);
    }
}
