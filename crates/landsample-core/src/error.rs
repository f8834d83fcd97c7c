use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors. Non-fatal conditions (sampling shortfall, single rejected
/// candidates) are recorded in the manifest instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid extent or grid request: {reason}")]
    InvalidExtent { reason: String },

    #[error("region is empty (area {area} m²)")]
    EmptyRegion { area: f64 },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("geometry provider unavailable after {failures} consecutive failures")]
    ProviderUnavailable {
        failures: usize,
        #[source]
        source: ProviderError,
    },
}

impl Error {
    pub(crate) fn invalid_extent(reason: impl Into<String>) -> Self {
        Error::InvalidExtent { reason: reason.into() }
    }

    pub(crate) fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter { name, reason: reason.into() }
    }
}

/// Failure reported by a [`crate::provider::GeometryProvider`] call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("{operation} failed: {message}")]
    Service { operation: &'static str, message: String },

    /// The provider cannot answer this query at all; retrying will not help.
    #[error("{operation} is not supported by this provider")]
    Unsupported { operation: &'static str },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. } | ProviderError::Service { .. })
    }
}
