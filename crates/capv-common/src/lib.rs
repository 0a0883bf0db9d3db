//! Common building blocks for capv-bootstrap: command execution, polling,
//! tool preflight, progress events and configuration.

#![deny(missing_docs)]

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod kube_get;
pub mod log_sink;
pub mod retry;
pub mod tools;
pub mod workdir;

pub use command::{CommandInvocation, CommandOutput, CommandRunner, CommandRunnerExt, ProcessRunner};
pub use config::ProvisioningSpec;
pub use error::Error;
pub use events::{event_bus, Event, EventKind, EventReceiver, EventSender};
pub use log_sink::LogSink;
pub use retry::RetryPoller;
pub use tools::ToolRegistry;
pub use workdir::ClusterDir;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the kind binary
pub const KIND: &str = "kind";
/// Name of the clusterctl binary
pub const CLUSTERCTL: &str = "clusterctl";
/// Name of the kubectl binary
pub const KUBECTL: &str = "kubectl";
/// Name of the tridentctl binary
pub const TRIDENTCTL: &str = "tridentctl";
/// Name of the govc binary
pub const GOVC: &str = "govc";
