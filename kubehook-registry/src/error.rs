//! Error types for registry inspection

use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while inspecting an image in its registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Registry returned an error status code
    #[error("Registry error (status {status}) for {url}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Token exchange with the registry's auth service failed
    #[error("Registry authentication failed: {0}")]
    AuthFailed(String),

    /// Manifest or config blob did not have the expected shape
    #[error("Failed to parse registry response: {0}")]
    ParseError(String),
}

impl RegistryError {
    /// Create an API error from status code and URL
    pub fn api_error(status: u16, url: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            url: url.into(),
        }
    }

    /// Check if the registry refused our credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::AuthFailed(_))
            || matches!(self, Self::ApiError { status: 401 | 403, .. })
    }

    /// Check if the image or tag does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }
}
