//! Error types for the blueprint host.

use thiserror::Error;

use crate::wasm::Fault;

/// Blueprint host error type
#[derive(Error, Debug)]
pub enum BlueprintError {
    /// Bytes are not a well-formed module for the sandbox
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Required exports or imports are absent or have the wrong signature
    #[error("unsupported interface: {0}")]
    UnsupportedInterface(String),

    /// Memory, arena or instance limits reached
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The module rejected its parameters, or none were parsed yet
    #[error("invalid parameters: {reason}")]
    InvalidParameters {
        /// Negative code returned by `parse_parameters`, if the module was called
        code: Option<i32>,
        /// Human-readable reason
        reason: String,
    },

    /// The module trapped, ran out of budget, or was already poisoned
    #[error("module fault: {0}")]
    ModuleFault(Fault),

    /// The module returned a value outside its documented range
    #[error("malformed result: '{export}' returned {value}")]
    MalformedResult {
        /// Export that produced the value
        export: &'static str,
        /// Raw value
        value: i32,
    },

    /// The instance was disposed
    #[error("instance has been disposed")]
    Disposed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlueprintError {
    /// Whether retrying can succeed: after backing off for resource limits,
    /// or on a fresh instance for faults.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BlueprintError::ResourceExhausted(_)
                | BlueprintError::ModuleFault(_)
                | BlueprintError::MalformedResult { .. }
        )
    }

    /// Whether the instance that produced this error can never be used again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlueprintError::ModuleFault(_)
                | BlueprintError::MalformedResult { .. }
                | BlueprintError::Disposed
        )
    }
}

/// Result type alias for blueprint host operations
pub type Result<T> = std::result::Result<T, BlueprintError>;
