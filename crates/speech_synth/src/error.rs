//! Synthesis errors

use thiserror::Error;

/// Errors that can abort a synthesis segment
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    /// Invalid request parameters, detected before any network call
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure talking to the synthesis backend
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("Backend returned HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Timeout during the network exchange
    #[error("Synthesis request timeout after {0}ms")]
    Timeout(u64),

    /// Response format tag not recognized
    #[error("Unsupported audio format: {0:?}")]
    UnsupportedFormat(String),

    /// Corrupt or truncated compressed stream
    #[error("Decode error: {0}")]
    Decode(String),

    /// Malformed or inconsistent container header
    #[error("Container parse error: {0}")]
    ContainerParse(String),

    /// Resampler could not be built or failed mid-stream
    #[error("Resample error: {0}")]
    Resample(String),

    /// Segment was cancelled before completion
    #[error("Synthesis cancelled")]
    Cancelled,

    /// Segment task stopped without reporting an outcome (panic or abort)
    #[error("Segment aborted: {0}")]
    Aborted(String),
}

impl SynthesisError {
    /// Whether this error came from the network exchange
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::HttpStatus { .. } | Self::Timeout(_)
        )
    }
}

impl From<symphonia::core::errors::Error> for SynthesisError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for SynthesisError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        Self::Resample(err.to_string())
    }
}

impl From<rubato::ResampleError> for SynthesisError {
    fn from(err: rubato::ResampleError) -> Self {
        Self::Resample(err.to_string())
    }
}
