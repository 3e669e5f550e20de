//! Error handling for simulation runs.
//!
//! Every fallible operation of the engine returns a [`SimResult`]. Errors
//! raised while a node processes an event are wrapped exactly once into
//! [`SimError::System`], which names the node and is the category callers
//! check with [`SimError::is_system_error`] to tell a malformed model apart
//! from other failures.

use thiserror::Error;

use crate::config::ConfigError;
use crate::time::TimeError;

/// Errors that can occur while building or running a simulation.
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Time(#[from] TimeError),

    /// Contract violated by model code or by misuse of the driver.
    #[error("{0}")]
    Logic(String),

    /// Error raised deliberately by a node's own logic.
    #[error("{0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An event aborted inside a node.
    #[error("Aborting event in node ({node}) due to error (\"{message}\")")]
    System { node: String, message: String },
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub fn logic(message: impl Into<String>) -> Self {
        SimError::Logic(message.into())
    }

    pub fn model(message: impl Into<String>) -> Self {
        SimError::Model(message.into())
    }

    /// Returns `true` if the error aborted an event inside a node.
    pub fn is_system_error(&self) -> bool {
        matches!(self, SimError::System { .. })
    }

    /// Full name of the node whose event was aborted, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            SimError::System { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Attributes the error to the node `full_name`, unless an inner node
    /// already claimed it.
    pub(crate) fn in_node(self, full_name: &str) -> SimError {
        if self.is_system_error() {
            self
        } else {
            SimError::System {
                node: full_name.to_string(),
                message: self.to_string(),
            }
        }
    }
}
