//! Remote step API error types

use thiserror::Error;

/// Errors that can occur when talking to the remote step API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Network failure or timeout; safe to retry
    #[error("{provider}: unavailable - {message}")]
    Unavailable { provider: String, message: String },

    /// 401 Unauthorized - API key invalid or missing
    #[error("{provider}: Unauthorized (401)")]
    Unauthorized { provider: String },

    /// 403 Forbidden - API key lacks access to the project
    #[error("{provider}: Forbidden (403) - insufficient permissions")]
    Forbidden { provider: String },

    /// 404 on a specific resource
    #[error("{provider}: {resource} not found (404)")]
    NotFound { provider: String, resource: String },

    /// 429 Rate Limited
    #[error("{provider}: Rate limited")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// Other non-success HTTP status
    #[error("{provider}: HTTP {status} - {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    /// Response body could not be understood
    #[error("{provider}: unexpected response - {message}")]
    Decode { provider: String, message: String },

    /// A write reported failure and verification could not tell whether it
    /// took effect; needs manual reconciliation
    #[error("{provider}: {operation} outcome unknown - {message}")]
    Ambiguous {
        provider: String,
        operation: String,
        message: String,
    },

    /// The remote attached a created step to another process
    #[error("{provider}: step {remote_id} created under process '{actual}' instead of '{expected}'")]
    WrongAttachment {
        provider: String,
        remote_id: String,
        expected: String,
        actual: String,
    },

    /// Base URL or API key missing
    #[error("{provider}: Not configured ({message})")]
    NotConfigured { provider: String, message: String },
}

impl ApiError {
    /// Network/timeout errors; the caller may retry the whole commit
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ApiError::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ApiError::Ambiguous { .. })
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized { .. } | ApiError::Forbidden { .. }
        )
    }

    /// HTTP status, when the error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn provider_name(&self) -> &str {
        match self {
            ApiError::Unavailable { provider, .. }
            | ApiError::Unauthorized { provider }
            | ApiError::Forbidden { provider }
            | ApiError::NotFound { provider, .. }
            | ApiError::RateLimited { provider, .. }
            | ApiError::Http { provider, .. }
            | ApiError::Decode { provider, .. }
            | ApiError::Ambiguous { provider, .. }
            | ApiError::WrongAttachment { provider, .. }
            | ApiError::NotConfigured { provider, .. } => provider,
        }
    }

    /// Map a non-success status to an error
    pub fn from_status(
        provider: impl Into<String>,
        status: u16,
        resource: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        match status {
            401 => ApiError::Unauthorized { provider },
            403 => ApiError::Forbidden { provider },
            404 => ApiError::NotFound {
                provider,
                resource: resource.into(),
            },
            429 => ApiError::RateLimited {
                provider,
                retry_after_secs: None,
            },
            _ => ApiError::http(provider, status, body),
        }
    }

    /// Create a network/timeout error
    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ApiError::Http {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn not_found(provider: impl Into<String>, resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            provider: provider.into(),
            resource: resource.into(),
        }
    }

    pub fn decode(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Decode {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn ambiguous(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApiError::Ambiguous {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_configured(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::NotConfigured {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
