//! Error handling for the gateway core.
//!
//! One crate-wide error enum covers resolution, configuration, translation,
//! media and upstream failures. Resolution/translation errors are cheap and
//! fail the request before any upstream call; upstream failures carry the
//! raw status and body so they can be classified (see `classify`).

use thiserror::Error;

/// Coarse error category, mainly for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller must fix the request
    Client,
    /// Operator must fix the deployment configuration
    Configuration,
    /// Upstream provider fault
    Upstream,
    /// Everything the gateway itself got wrong
    Gateway,
}

/// Gateway core error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The requested model matches no catalog entry or mapping.
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// The model exists but every provider mapping is past its deactivation time.
    #[error("Model deactivated: {0}")]
    ModelDeactivated(String),

    /// A required environment/option key is missing or malformed.
    /// The message names the missing key so operators can fix the deployment.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Image decode/fetch/size failures. Messages are sanitized and never
    /// echo the source URL.
    #[error("Image processing error: {0}")]
    ImageProcessingError(String),

    /// The request body is structurally invalid for the resolved provider.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A generation parameter is out of range for the resolved provider.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The resolved provider cannot serve this request shape.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Upstream returned a non-success status. Classification happens in
    /// `classify::classify_failure`; this variant keeps the raw material.
    #[error("Upstream API error {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Transport-level failure before any status line was received.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Upstream payload did not match any known shape.
    #[error("Response parse error: {0}")]
    ParseError(String),

    /// The composed abort signal fired from its timer.
    #[error("Upstream call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The composed abort signal fired from caller cancellation.
    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status this error maps to at the gateway's inbound surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedModel(_) => 400,
            Self::ModelDeactivated(_) => 410,
            Self::InvalidInput(_) | Self::InvalidParameter(_) => 400,
            Self::ImageProcessingError(_) => 413,
            Self::UnsupportedOperation(_) => 400,
            Self::ApiError { status, .. } => *status,
            Self::Timeout(_) => 504,
            Self::Cancelled => 499,
            Self::ConfigurationError(_)
            | Self::HttpError(_)
            | Self::ParseError(_)
            | Self::Internal(_) => 500,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedModel(_)
            | Self::ModelDeactivated(_)
            | Self::InvalidInput(_)
            | Self::InvalidParameter(_)
            | Self::ImageProcessingError(_)
            | Self::UnsupportedOperation(_)
            | Self::Cancelled => ErrorCategory::Client,
            Self::ConfigurationError(_) => ErrorCategory::Configuration,
            Self::ApiError { .. } | Self::Timeout(_) | Self::HttpError(_) => {
                ErrorCategory::Upstream
            }
            Self::ParseError(_) | Self::Internal(_) => ErrorCategory::Gateway,
        }
    }

    /// Terminal errors must not be retried by any outer orchestration.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedModel(_)
                | Self::ModelDeactivated(_)
                | Self::ConfigurationError(_)
                | Self::InvalidInput(_)
                | Self::InvalidParameter(_)
                | Self::UnsupportedOperation(_)
                | Self::Cancelled
        )
    }

    /// Convenience constructor mirroring upstream error responses.
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
            details: None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest's own timeout; ours is usually enforced by AbortSignal
            Self::Timeout(std::time::Duration::ZERO)
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            GatewayError::UnsupportedModel("gpt-99".into()).status_code(),
            400
        );
        assert_eq!(
            GatewayError::ModelDeactivated("old-model".into()).status_code(),
            410
        );
        assert_eq!(GatewayError::api_error(502, "bad gateway").status_code(), 502);
    }

    #[test]
    fn configuration_errors_are_terminal() {
        let err = GatewayError::ConfigurationError("AZURE_RESOURCE_NAME is not set".into());
        assert!(err.is_terminal());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn upstream_errors_are_not_terminal() {
        assert!(!GatewayError::api_error(503, "overloaded").is_terminal());
    }
}
