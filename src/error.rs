// Error taxonomy for asset lifecycle operations.

use thiserror::Error;

use crate::engine::record::AssetStatus;

/// Failure of a registry, cache or loader operation.
///
/// Cloneable so a single load failure can be delivered to every caller
/// attached to the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("unknown asset '{id}'")]
    UnknownAsset { id: String },

    #[error("release of '{id}' without a matching retain")]
    RefCountUnderflow { id: String },

    #[error("load of '{id}' failed: {reason}")]
    LoadFailure { id: String, reason: String },

    #[error("generation of '{id}' failed: {reason}")]
    GenerationFailure { id: String, reason: String },

    #[error("generation service unreachable: {reason}")]
    Connection { reason: String },

    #[error("asset '{id}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: AssetStatus,
        to: AssetStatus,
    },

    #[error("request for '{id}' was cancelled")]
    Cancelled { id: String },
}

impl AssetError {
    pub fn unknown(id: &str) -> Self {
        Self::UnknownAsset { id: id.to_string() }
    }

    pub fn load(id: &str, err: &anyhow::Error) -> Self {
        Self::LoadFailure {
            id: id.to_string(),
            reason: format!("{:#}", err),
        }
    }

    pub fn generation(id: &str, reason: impl Into<String>) -> Self {
        Self::GenerationFailure {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Human-readable reason stored on a failed record.
    pub fn reason(&self) -> String {
        match self {
            Self::LoadFailure { reason, .. } | Self::GenerationFailure { reason, .. } => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }

    /// Attribute a generation-service error to the asset that triggered it.
    pub fn from_service(id: &str, err: ServiceError) -> Self {
        match err {
            ServiceError::Connection(reason) => Self::Connection { reason },
            other => Self::generation(id, other.to_string()),
        }
    }
}

/// Failure talking to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("generation service unreachable: {0}")]
    Connection(String),

    #[error("generation service rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed generation service response: {0}")]
    Malformed(String),
}

/// Invalid or unparsable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
