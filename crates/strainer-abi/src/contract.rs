//! The blueprint export contract.
//!
//! A blueprint exports two nullary functions returning `i32` plus its linear
//! memory:
//!
//! ```wat
//! (export "memory" (memory 1))
//! (export "parse_parameters" (func (result i32)))
//! (export "matches" (func (result i32)))
//! ```
//!
//! Inputs are not passed as arguments. During each call the host exposes a
//! single `(offset, length)` descriptor of the bytes it placed in the
//! blueprint's memory, and the handle returned by the last successful
//! `parse_parameters`, through the functions of the [`HOST_MODULE`] import
//! namespace.

use serde::{Deserialize, Serialize};

/// Export that validates and parses filter parameters.
pub const PARSE_PARAMETERS_EXPORT: &str = "parse_parameters";

/// Export that evaluates one record.
pub const MATCHES_EXPORT: &str = "matches";

/// Exported linear memory shared with the host.
pub const MEMORY_EXPORT: &str = "memory";

/// Functions every blueprint must export.
pub const REQUIRED_FUNCTIONS: [&str; 2] = [PARSE_PARAMETERS_EXPORT, MATCHES_EXPORT];

/// Import namespace of the host functions.
pub const HOST_MODULE: &str = "blueprint";

/// `() -> i32`: offset of the current call's input.
pub const INPUT_OFFSET_IMPORT: &str = "input_offset";

/// `() -> i32`: length of the current call's input.
pub const INPUT_LENGTH_IMPORT: &str = "input_length";

/// `() -> i32`: handle returned by the last successful `parse_parameters`.
pub const PARAMS_HANDLE_IMPORT: &str = "params_handle";

/// `(level: i32, ptr: i32, len: i32) -> ()`: log a UTF-8 message.
pub const LOG_IMPORT: &str = "log";

/// Returned by `input_offset` and `params_handle` when nothing is available.
pub const NONE: i32 = -1;

/// `matches` result: record does not match
pub const NO_MATCH: i32 = 0;

/// `matches` result: record matches
pub const MATCH: i32 = 1;

/// Log levels accepted by the `log` import, most severe first.
pub mod log_level {
    /// Error
    pub const ERROR: i32 = 0;
    /// Warning
    pub const WARN: i32 = 1;
    /// Informational
    pub const INFO: i32 = 2;
    /// Debug
    pub const DEBUG: i32 = 3;
    /// Trace
    pub const TRACE: i32 = 4;
}

/// Interpretation of the `i32` returned by `parse_parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Parameters accepted; opaque handle to the module's parsed form
    Handle(i32),
    /// Parameters rejected with a module-defined negative code
    Rejected(i32),
}

impl ParseOutcome {
    /// Classify a raw return value.
    pub fn from_raw(raw: i32) -> Self {
        if raw >= 0 {
            ParseOutcome::Handle(raw)
        } else {
            ParseOutcome::Rejected(raw)
        }
    }
}

/// Interpretation of the `i32` returned by `matches`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// `1`
    Match,
    /// `0`
    NoMatch,
    /// Anything else: the module broke its contract
    Malformed(i32),
}

impl MatchOutcome {
    /// Classify a raw return value.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            MATCH => MatchOutcome::Match,
            NO_MATCH => MatchOutcome::NoMatch,
            other => MatchOutcome::Malformed(other),
        }
    }
}

/// Outcome of evaluating one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterVerdict {
    /// Whether the record matched
    pub r#match: bool,
}

impl FilterVerdict {
    /// Whether the record matched.
    pub fn is_match(&self) -> bool {
        self.r#match
    }
}

impl From<bool> for FilterVerdict {
    fn from(r#match: bool) -> Self {
        Self { r#match }
    }
}
