//! Error types shared by the bootstrap engine
//!
//! Errors carry the command line, resource identifier or wait description that
//! failed so a run can be diagnosed from the error alone.

use std::time::Duration;

use thiserror::Error;

/// Main error type for command execution, polling and configuration
#[derive(Debug, Error)]
pub enum Error {
    /// Binary could not be resolved on `$PATH`; nothing was spawned
    #[error("exec: '{name}': executable file not found in $PATH")]
    ToolNotFound {
        /// Program name that was looked up
        name: String,
    },

    /// Preflight found one or more required binaries missing
    #[error("the following commands were not found in $PATH: [{}]", .names.join(", "))]
    ToolsMissing {
        /// Every missing program, in registry order
        names: Vec<String>,
    },

    /// Command exceeded its deadline and was killed
    #[error("command timed out after {timeout:?}: {command}")]
    CommandTimeout {
        /// Full command line
        command: String,
        /// Deadline that expired
        timeout: Duration,
        /// Output captured before the deadline
        stdout: String,
        /// Error output captured before the deadline
        stderr: String,
    },

    /// Command exited unsuccessfully or wrote to stderr
    #[error("command failed: {command}: {message}, stderr: {stderr}")]
    CommandFailed {
        /// Full command line
        command: String,
        /// What went wrong (exit status, spawn failure)
        message: String,
        /// Captured error output
        stderr: String,
    },

    /// An inventory or Kubernetes lookup returned nothing
    #[error("{kind} not found: {name}")]
    ResourceNotFound {
        /// Resource kind (datacenter, secret, ...)
        kind: String,
        /// Name, path or selector that was looked up
        name: String,
    },

    /// Readiness wait ran out of time
    #[error("timed out after {timeout:?} waiting for {description}")]
    PollTimeout {
        /// What was being waited for
        description: String,
        /// Overall wait budget
        timeout: Duration,
    },

    /// Readiness wait gave up after too many consecutive failures
    #[error("gave up waiting for {description} after {failures} consecutive failures: {last_error}")]
    PollAborted {
        /// What was being waited for
        description: String,
        /// Consecutive failures observed
        failures: u32,
        /// Last failure message
        last_error: String,
    },

    /// Invalid provisioning configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g. "ClusterName")
        field: Option<String>,
    },

    /// Kubernetes object could not be decoded
    #[error("failed to decode {kind}: {message}")]
    Decode {
        /// Requested kind
        kind: String,
        /// Underlying decode failure
        message: String,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a command failure for a command line
    pub fn command_failed(
        command: impl Into<String>,
        message: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a not-found error for a resource kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a decode error for a Kubernetes kind
    pub fn decode(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Whether this is a `ResourceNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}
