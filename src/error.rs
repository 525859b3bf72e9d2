//! Error taxonomy for a scan session
//!
//! Everything in [`ScanError`] is terminal: the orchestrator aborts the
//! session and the process exits non-zero. Scanner and upload failures are
//! not errors; they surface as [`crate::scanner::ScanOutcome`] and
//! [`crate::upload::UploadOutcome`] values and are logged as warnings.

use thiserror::Error;

use crate::providers::CloudProvider;

/// Errors that end a scan session
#[derive(Debug, Error)]
pub enum ScanError {
    /// No parameter at the expected secret store path
    #[error("Secret not found at {path}")]
    MissingSecret { path: String },

    /// No role ARN stored for the account
    #[error("Role ARN not found at {path}")]
    MissingRole { path: String },

    /// The stored payload could not be decoded into usable credentials
    #[error("Invalid credential format: {0}")]
    InvalidCredentialFormat(String),

    /// The provider rejected the credential exchange
    #[error("Authentication failed for {provider}: {reason}")]
    AuthError {
        provider: CloudProvider,
        reason: String,
    },

    /// The secret store call failed for a reason other than not-found
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// Client or account name unusable as a path segment
    #[error("Invalid {field} {value:?}: must be a single path segment")]
    InvalidTarget { field: &'static str, value: String },

    /// Provider tag outside the supported set
    #[error("Unsupported provider: {0} (expected one of aws, azure, gcp)")]
    UnsupportedProvider(String),

    /// Scanner binary not available
    #[error("Scanner not found: {0}")]
    ScannerNotFound(String),

    /// External process could not be started
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn auth(provider: CloudProvider, reason: impl Into<String>) -> Self {
        ScanError::AuthError {
            provider,
            reason: reason.into(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        1
    }
}
