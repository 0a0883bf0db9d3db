//! Error types for vSphere operations

use thiserror::Error;

/// Errors from the hypervisor resource layer
#[derive(Debug, Error)]
pub enum Error {
    /// Command, polling or lookup failure from the shared layer
    #[error("{0}")]
    Common(#[from] capv_common::Error),

    /// A vSphere call returned an error
    #[error("vSphere {operation} failed: {message}")]
    Api {
        /// Operation that failed (e.g. "folder.create")
        operation: String,
        /// Error reported by vCenter
        message: String,
    },

    /// vCenter rejected the OVF descriptor
    #[error("unable to create import spec for {template}: {}", .errors.join("; "))]
    ImportSpecInvalid {
        /// Template being imported
        template: String,
        /// Errors vCenter returned
        errors: Vec<String>,
    },

    /// Upload into an import lease failed; the lease was aborted
    #[error("import lease for {template} failed: {message}")]
    Lease {
        /// Template being imported
        template: String,
        /// What failed
        message: String,
    },

    /// OVA archive could not be read
    #[error("invalid OVA archive {location}: {message}")]
    Archive {
        /// Local path or URL
        location: String,
        /// What was wrong with it
        message: String,
    },

    /// Multiple candidates and nobody to choose between them
    #[error("{count} {kind} candidates found, set one of: {}", .names.join(", "))]
    Ambiguous {
        /// Inventory kind
        kind: String,
        /// Number of candidates
        count: usize,
        /// Candidate names
        names: Vec<String>,
    },

    /// Bad vCenter endpoint
    #[error("invalid vCenter url: {0}")]
    Url(#[from] url::ParseError),

    /// HTTP error while reading a remote archive
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud-init rendering failed
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an API error for an operation
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an archive error for a location
    pub fn archive(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Archive {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Common(capv_common::Error::not_found(kind, name))
    }

    /// Whether the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Common(e) if e.is_not_found())
    }
}

/// Result type alias for vSphere operations
pub type Result<T> = std::result::Result<T, Error>;
