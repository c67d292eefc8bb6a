//! Error types for stm
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad input, unknown task, missing `.stm/`)
//! - 3: Blocked (delete refused because other tasks depend on the target)
//! - 4: Operation failed (lock timeout, unreadable task file, I/O)

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::lock::LockHolder;

/// Exit codes for the stm CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// A task that still references the one being deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependent {
    pub id: u64,
    pub title: String,
}

/// Main error type for stm operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(u64),

    #[error("Task store not initialized at {} (run `stm init`)", display_path(.0))]
    NotInitialized(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Blocked (exit code 3)
    #[error(
        "Task {id} is a dependency of {}; delete them first or pass --force",
        format_dependents(.dependents)
    )]
    DependencyConflict { id: u64, dependents: Vec<Dependent> },

    // Operation failures (exit code 4)
    #[error(
        "Timed out after {waited_ms}ms waiting for lock {}{}",
        display_path(.path),
        format_holder(.holder)
    )]
    LockTimeout {
        path: PathBuf,
        waited_ms: u64,
        holder: Option<LockHolder>,
    },

    #[error("Parse error{}: {message}", format_location(.path, .line))]
    Parse {
        path: Option<PathBuf>,
        line: Option<usize>,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

fn format_dependents(dependents: &[Dependent]) -> String {
    dependents
        .iter()
        .map(|dep| format!("#{} \"{}\"", dep.id, dep.title))
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_path(path: &std::path::Path) -> String {
    path.display().to_string()
}

fn format_holder(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(holder) => format!(
            " (held by pid {} running `{}` since {})",
            holder.pid,
            holder.command,
            holder.acquired_at.to_rfc3339()
        ),
        None => String::new(),
    }
}

fn format_location(path: &Option<PathBuf>, line: &Option<usize>) -> String {
    match (path, line) {
        (Some(path), Some(line)) => format!(" in {}:{}", path.display(), line),
        (Some(path), None) => format!(" in {}", path.display()),
        (None, Some(line)) => format!(" at line {line}"),
        (None, None) => String::new(),
    }
}

impl Error {
    /// Build a parse error without file context
    pub fn parse(line: Option<usize>, message: impl Into<String>) -> Self {
        Error::Parse {
            path: None,
            line,
            message: message.into(),
        }
    }

    /// Attach the offending file to a parse error; other errors pass through
    pub fn with_path(self, file: impl Into<PathBuf>) -> Self {
        match self {
            Error::Parse {
                path: None,
                line,
                message,
            } => Error::Parse {
                path: Some(file.into()),
                line,
                message,
            },
            other => other,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::Validation(_)
            | Error::NotFound(_)
            | Error::NotInitialized(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            // Blocked
            Error::DependencyConflict { .. } => exit_codes::BLOCKED,

            // Operation failures
            Error::LockTimeout { .. }
            | Error::Parse { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured diagnostics for machine-readable output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::DependencyConflict { id, dependents } => Some(serde_json::json!({
                "id": id,
                "dependents": dependents,
            })),
            Error::LockTimeout {
                path,
                waited_ms,
                holder,
            } => Some(serde_json::json!({
                "lock": path,
                "waited_ms": waited_ms,
                "holder": holder,
            })),
            Error::Parse { path, line, .. } => Some(serde_json::json!({
                "path": path,
                "line": line,
            })),
            Error::NotFound(id) => Some(serde_json::json!({ "id": id })),
            _ => None,
        }
    }
}

/// Result type alias for stm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
