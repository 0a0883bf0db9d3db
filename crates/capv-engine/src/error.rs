//! Error types for the provisioning engine

use thiserror::Error;

use crate::pipeline::Phase;

/// Errors raised while driving the pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Command, polling, or config failure from the shared layer
    #[error(transparent)]
    Common(#[from] capv_common::Error),

    /// A phase failed; the pipeline stopped here
    #[error("{phase} failed: {source}")]
    Phase {
        /// Phase that was running
        phase: Phase,
        /// What went wrong inside it
        #[source]
        source: Box<Error>,
    },

    /// One or more addon installers failed
    #[error("addon installation failed: {}", describe_failures(.failures))]
    AddonsFailed {
        /// `(addon name, error)` for every installer that failed
        failures: Vec<(String, Error)>,
    },

    /// Manifest template could not be rendered
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Downloading an artifact failed
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An addon archive could not be fetched or unpacked
    #[error("archive {location}: {message}")]
    Archive {
        /// Path or URL of the archive
        location: String,
        /// What failed
        message: String,
    },

    /// Local file operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap `source` as the failure of `phase`
    pub fn phase(phase: Phase, source: Error) -> Self {
        Self::Phase {
            phase,
            source: Box::new(source),
        }
    }

    /// Create an archive error
    pub fn archive(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Archive {
            location: location.into(),
            message: message.into(),
        }
    }

    /// The phase this error was raised in, if known
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

fn describe_failures(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(addon, error)| format!("{}: {}", addon, error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_error_names_the_phase() {
        let inner = Error::Common(capv_common::Error::ToolNotFound {
            name: "kind".into(),
        });
        let err = Error::phase(Phase::CreateBootstrap, inner);

        assert_eq!(err.failed_phase(), Some(Phase::CreateBootstrap));
        let message = err.to_string();
        assert!(message.starts_with("CreateBootstrap failed:"));
        assert!(message.contains("kind"));
    }

    #[test]
    fn addon_failures_are_listed_by_name() {
        let err = Error::AddonsFailed {
            failures: vec![
                ("trident".into(), Error::archive("x", "boom")),
                ("observability".into(), Error::archive("y.tgz", "not gzip")),
            ],
        };

        let message = err.to_string();
        assert!(message.contains("trident: archive x: boom"));
        assert!(message.contains("observability: archive y.tgz: not gzip"));
    }
}
