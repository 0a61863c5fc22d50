//! Proxmox VE API access
//!
//! The [`ProxmoxApi`] trait is the only seam between the reconcilers and
//! the cluster. [`HttpProxmoxClient`] talks to a live cluster,
//! `MockProxmoxApi` (feature `test-support`) replays scripted responses.

pub mod client;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use client::{
    encode_params, find_object, get_list, get_object, segment, ApiParams, HttpProxmoxClient,
    ProxmoxApi,
};
pub use config::{ApiConfig, ConfigError, Credentials, DEFAULT_API_PORT, DEFAULT_API_TIMEOUT};
pub use error::ApiError;
#[cfg(any(test, feature = "test-support"))]
pub use mock::{MockProxmoxApi, RecordedCall};

/// Result type for API calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;
