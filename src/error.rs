//! Error types for branchtodo
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, invalid configuration)
//! - 3: Not found (unknown todo id or branch)
//! - 4: Operation failed (I/O, persistence, git)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the branchtodo CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const NOT_FOUND: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for branchtodo operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Repository not found from {0}")]
    RepoNotFound(PathBuf),

    // Lookups (exit code 3)
    #[error("Todo not found on branch '{branch}': {id}")]
    TodoNotFound { branch: String, id: String },

    #[error("Branch has no todos: {0}")]
    BranchNotFound(String),

    // Operation failures (exit code 4)
    #[error("Cannot read {path}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) | Error::InvalidArgument(_) | Error::RepoNotFound(_) => {
                exit_codes::USER_ERROR
            }

            Error::TodoNotFound { .. } | Error::BranchNotFound(_) => exit_codes::NOT_FOUND,

            Error::UnreadableFile { .. }
            | Error::Git(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::Watch(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured payload for JSON error envelopes.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::TodoNotFound { branch, id } => Some(serde_json::json!({
                "branch": branch,
                "id": id,
            })),
            Error::BranchNotFound(branch) => Some(serde_json::json!({ "branch": branch })),
            Error::UnreadableFile { path, .. } | Error::LockFailed(path) => {
                Some(serde_json::json!({ "path": path }))
            }
            _ => None,
        }
    }
}

/// Result type alias for branchtodo operations
pub type Result<T> = std::result::Result<T, Error>;
