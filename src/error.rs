//! Error module for the grownet library.
use std::error::Error;
use std::fmt;

use itertools::Itertools;

/// Error types for the library.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// Error for bad or missing parameters, aggregated over the whole configuration.
    /// Raised before any simulation step; nothing is partially constructed.
    InvalidConfiguration(Vec<String>),
    /// Error for a synapse creation that would exceed the per-neuron cap.
    /// Recoverable: the growth pass records and skips the creation.
    SynapseCapacity { neuron: usize, cap: usize },
    /// Error for an operation invoked in the wrong scheduler state.
    InvalidLifecycle(String),
    /// Error for a malformed or version-mismatched checkpoint. Restoring never
    /// partially applies a bad checkpoint.
    InvalidCheckpoint(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::InvalidConfiguration(issues) => {
                write!(f, "Invalid configuration: {}", issues.iter().join("; "))
            }
            SimError::SynapseCapacity { neuron, cap } => write!(
                f,
                "Synapse capacity exceeded: neuron {} already has {} outgoing synapses",
                neuron, cap
            ),
            SimError::InvalidLifecycle(e) => write!(f, "Invalid lifecycle: {}", e),
            SimError::InvalidCheckpoint(e) => write!(f, "Invalid checkpoint: {}", e),
            SimError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SimError {}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::IOError(e.to_string())
    }
}
