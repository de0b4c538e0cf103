//! Error types and exit codes for softpack-frontend

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for catalog operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    /// The remote has no commits yet. Not a failure: the store reports
    /// empty listings until the first write.
    #[error("Artefact repository is empty")]
    EmptyRepository,

    #[error("Invalid path segment: {segment:?}")]
    InvalidPath { segment: String },

    #[error("Malformed environment {path}: {reason}")]
    MalformedEnvironment { path: String, reason: String },

    #[error("Push rejected: {message}")]
    PushRejected { message: String },

    #[error("Git error: {message}")]
    GitError { message: String },

    #[error("Unknown endpoint: {method}")]
    UnknownEndpoint { method: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// True for errors a caller should surface as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. } | Self::EmptyRepository)
    }

    /// Convert error to a process exit code:
    /// - 1: IO / configuration error
    /// - 2: Artefact repository could not be opened or updated
    /// - 3: Index could not be built
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::ConfigError { .. } => ExitCode::from(1),
            Self::GitError { .. }
            | Self::PushRejected { .. }
            | Self::EmptyRepository
            | Self::PathNotFound { .. }
            | Self::InvalidPath { .. } => ExitCode::from(2),
            Self::MalformedEnvironment { .. }
            | Self::Serialization(_)
            | Self::UnknownEndpoint { .. } => ExitCode::from(3),
        }
    }
}

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;
