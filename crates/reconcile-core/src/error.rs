//! Reconciliation errors

use thiserror::Error;

use pve_api_client::ApiError;
use pve_shared_types::{SharedTypeError, SDN_LOCK_FILE};

/// Failures of the SDN lock protocol. The variants that may leave the
/// cluster lock behind carry the lock file to delete by hand.
#[derive(Debug, Error)]
pub enum SdnError {
    #[error("Failed to acquire SDN lock: {source}")]
    LockHeldByOther { source: ApiError },

    #[error("Failed to apply SDN changes, pending changes were rolled back and the lock released: {source}")]
    ApplyFailed { source: ApiError },

    #[error("{}Rollback of SDN changes failed: {source}. Manually clear lock by deleting {lock_file}", cause_prefix(.cause))]
    LockStale {
        source: ApiError,
        cause: Option<String>,
        lock_file: &'static str,
    },

    #[error("Failed to release SDN lock: {source}. Manually clear lock by deleting {lock_file}")]
    ReleaseFailed {
        source: ApiError,
        lock_file: &'static str,
    },

    #[error("{context}, pending changes were rolled back: {source}")]
    MutationFailed { context: String, source: ApiError },
}

fn cause_prefix(cause: &Option<String>) -> String {
    cause
        .as_ref()
        .map(|cause| format!("{cause}. "))
        .unwrap_or_default()
}

impl SdnError {
    pub fn lock_stale(source: ApiError, cause: Option<String>) -> Self {
        SdnError::LockStale {
            source,
            cause,
            lock_file: SDN_LOCK_FILE,
        }
    }

    pub fn release_failed(source: ApiError) -> Self {
        SdnError::ReleaseFailed {
            source,
            lock_file: SDN_LOCK_FILE,
        }
    }

    /// File an operator has to delete when the lock could not be released.
    pub fn recovery_path(&self) -> Option<&'static str> {
        match self {
            SdnError::LockStale { lock_file, .. } | SdnError::ReleaseFailed { lock_file, .. } => {
                Some(*lock_file)
            }
            _ => None,
        }
    }

    /// False only when the cluster lock may still be held.
    pub fn lock_released(&self) -> bool {
        self.recovery_path().is_none()
    }
}

/// Errors raised by the resource reconcilers
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{context}: {source}")]
    Api { context: String, source: ApiError },

    #[error("{0}")]
    Validation(String),

    #[error("{resource} is missing required parameters: {}", .missing.join(", "))]
    MissingParameters {
        resource: String,
        missing: Vec<String>,
    },

    #[error("DHCP ranges {} partially overlap existing ranges", .ranges.join(", "))]
    PartialOverlap { ranges: Vec<String> },

    #[error("{resource} already exists and update is disabled")]
    UpdateDisabled { resource: String },

    #[error(transparent)]
    Sdn(#[from] SdnError),

    #[error(transparent)]
    Shared(#[from] SharedTypeError),
}

impl ReconcileError {
    pub fn validation(message: impl Into<String>) -> Self {
        ReconcileError::Validation(message.into())
    }

    pub fn recovery_path(&self) -> Option<&'static str> {
        match self {
            ReconcileError::Sdn(err) => err.recovery_path(),
            _ => None,
        }
    }
}

/// Attach a description of the failed step to an API error.
pub trait ApiResultExt<T> {
    fn api_context(self, context: impl Into<String>) -> Result<T, ReconcileError>;

    fn with_api_context<F>(self, context: F) -> Result<T, ReconcileError>
    where
        F: FnOnce() -> String;
}

impl<T> ApiResultExt<T> for Result<T, ApiError> {
    fn api_context(self, context: impl Into<String>) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Api {
            context: context.into(),
            source,
        })
    }

    fn with_api_context<F>(self, context: F) -> Result<T, ReconcileError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| ReconcileError::Api {
            context: context(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_lock_names_lock_file() {
        let err = SdnError::lock_stale(
            ApiError::from_status(500, "/cluster/sdn/rollback", "timeout"),
            Some("Failed to create zone".to_string()),
        );

        assert_eq!(err.recovery_path(), Some("/etc/pve/sdn/.lock"));
        assert!(!err.lock_released());
        let text = err.to_string();
        assert!(text.starts_with("Failed to create zone. Rollback"));
        assert!(text.contains("Manually clear lock by deleting /etc/pve/sdn/.lock"));
    }

    #[test]
    fn test_apply_failure_reports_release() {
        let err = SdnError::ApplyFailed {
            source: ApiError::from_status(500, "/cluster/sdn", "boom"),
        };
        assert!(err.lock_released());
        assert_eq!(ReconcileError::from(err).recovery_path(), None);
    }

    #[test]
    fn test_missing_parameters_message() {
        let err = ReconcileError::MissingParameters {
            resource: "zone z1".to_string(),
            missing: vec!["bridge".to_string(), "tag".to_string()],
        };
        assert_eq!(err.to_string(), "zone z1 is missing required parameters: bridge, tag");
    }

    #[test]
    fn test_api_context() {
        let result: Result<(), ApiError> = Err(ApiError::from_status(403, "/access/acl", "denied"));
        let err = result.api_context("Failed to read ACLs").unwrap_err();
        assert!(err.to_string().starts_with("Failed to read ACLs: "));
    }
}
