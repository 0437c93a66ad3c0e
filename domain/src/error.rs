use thiserror::Error;

/// Errors raised by domain entities, ports and pure utilities.
///
/// Adapters translate vendor-specific failures into these variants at the
/// boundary; nothing above the adapter layer should see vendor error types.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{vendor} error: {message}")]
    ExternalService { vendor: String, message: String },

    #[error("{vendor} transient error: {message}")]
    Transient { vendor: String, message: String },

    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    /// Distinct from `Parse` so callers can fall back to a reasoning-field
    /// extraction instead of just failing (§4.2 Chat-LLM Adapter).
    #[error("{vendor} returned empty content")]
    EmptyContent { vendor: String, reasoning_fallback: Option<String> },

    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn external_service_error(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    pub fn transient(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn empty_content(vendor: impl Into<String>, reasoning_fallback: Option<String>) -> Self {
        Self::EmptyContent {
            vendor: vendor.into(),
            reasoning_fallback,
        }
    }

    /// The reasoning text the caller should parse instead, if the vendor
    /// supplied one alongside its empty `content` field.
    pub fn reasoning_fallback(&self) -> Option<&str> {
        match self {
            DomainError::EmptyContent { reasoning_fallback, .. } => reasoning_fallback.as_deref(),
            _ => None,
        }
    }

    /// Transient/network-shaped errors are worth retrying; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Transient { .. })
    }
}
