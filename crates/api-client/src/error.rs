//! Errors raised at the HTTP boundary

use thiserror::Error;

use pve_shared_types::SharedTypeError;

/// Proxmox API errors, classified by HTTP status rather than message text.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Permission denied on {path}: {message}")]
    PermissionDenied { path: String, message: String },

    #[error("{path} does not exist: {message}")]
    NotFound { path: String, message: String },

    #[error("API returned error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("Response parsing failed: {0}")]
    Parse(String),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Map a non-2xx response to an error variant.
    ///
    /// Some endpoints answer a missing object with HTTP 500 and a free text
    /// message. Those messages are recognised here, and only here, so callers
    /// never match on error strings themselves.
    pub fn from_status(status: u16, path: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => ApiError::Authentication { message },
            403 => ApiError::PermissionDenied {
                path: path.to_string(),
                message,
            },
            404 => ApiError::NotFound {
                path: path.to_string(),
                message,
            },
            500 if reports_missing(&message) => ApiError::NotFound {
                path: path.to_string(),
                message,
            },
            _ => ApiError::Status { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http(err) => err.status().map(|status| status.as_u16()),
            ApiError::Authentication { .. } => Some(401),
            ApiError::PermissionDenied { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Parse(_) | ApiError::Config(_) => None,
        }
    }
}

impl From<SharedTypeError> for ApiError {
    fn from(err: SharedTypeError) -> Self {
        ApiError::Parse(err.to_string())
    }
}

fn reports_missing(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("does not exist") || message.contains("no such")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ApiError::from_status(401, "/version", "invalid ticket"),
            ApiError::Authentication { .. }
        ));
        assert!(matches!(
            ApiError::from_status(403, "/access/acl", "Permission check failed"),
            ApiError::PermissionDenied { .. }
        ));
        assert!(ApiError::from_status(404, "/nodes/pve9", "").is_not_found());
        assert!(matches!(
            ApiError::from_status(500, "/cluster/sdn/lock", "could not acquire lock"),
            ApiError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_missing_object_text_maps_to_not_found() {
        let err = ApiError::from_status(500, "/access/domains/corp", "domain 'corp' does not exist");
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));

        let err = ApiError::from_status(500, "/cluster/ha/groups/ha0", "No such group 'ha0'");
        assert!(err.is_not_found());
    }
}
