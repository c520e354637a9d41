//! Error types for the array volume adapters
//!
//! One error type is shared by both adapters. Lookups never use it to signal
//! absence (they return `Option`); it is reserved for genuine failures, which
//! the orchestrators classify before deciding whether to roll back.

use thiserror::Error;

/// Unified error type for the adapters
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Backend API Errors
    // =========================================================================
    #[error("{backend} API error: {message}")]
    BackendApi { backend: String, message: String },

    #[error("{backend} returned HTTP {status} for {method} {url}")]
    UnexpectedStatus {
        backend: String,
        method: String,
        url: String,
        status: u16,
    },

    #[error("Required {kind} not found: {name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Invalid volume identifier: {0}")]
    InvalidVolumeId(String),

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("Job {job} did not complete after {attempts} polls")]
    JobTimeout { job: String, attempts: u32 },

    // =========================================================================
    // Masking Errors
    // =========================================================================
    #[error("Masking of volume {volume} to view {masking_view} failed: {reason}")]
    MaskingFailed {
        volume: String,
        masking_view: String,
        reason: String,
    },

    #[error(
        "Rollback for volume {volume} failed ({reason}) after: {original}. \
         Return the volume to its default storage group manually"
    )]
    RollbackFailed {
        volume: String,
        original: String,
        reason: String,
    },

    // =========================================================================
    // Transport / Parse Errors
    // =========================================================================
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the failure relates to vendor-side state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying; no vendor state was knowingly changed
    Transient,
    /// A required object is missing or the request is malformed
    Precondition,
    /// Failed after (or during) a vendor-side mutation
    MutationFailure,
    /// A compensating action failed; vendor state needs an operator
    RollbackFailure,
}

impl Error {
    /// Uniform backend API failure
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BackendApi {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// A required object is missing on the array
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Http(e) if e.is_connect() || e.is_timeout() => ErrorClass::Transient,
            Error::JobTimeout { .. } => ErrorClass::Transient,

            Error::Configuration(_)
            | Error::ResourceNotFound { .. }
            | Error::InvalidVolumeId(_)
            | Error::YamlParse(_) => ErrorClass::Precondition,

            Error::RollbackFailed { .. } => ErrorClass::RollbackFailure,

            _ => ErrorClass::MutationFailure,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Check if this error is transient at the transport level
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_connect() || e.is_timeout())
    }

    /// Whether vendor state may be inconsistent and needs manual repair
    pub fn needs_operator(&self) -> bool {
        matches!(self.class(), ErrorClass::RollbackFailure)
    }
}

/// Result type alias for the adapters
pub type Result<T> = std::result::Result<T, Error>;
