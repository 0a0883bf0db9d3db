//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] capv_common::Error),

    #[error(transparent)]
    Vsphere(#[from] capv_vsphere::Error),

    #[error(transparent)]
    Engine(#[from] capv_engine::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Config {
            path: path.into(),
            message: message.into(),
        }
    }
}
