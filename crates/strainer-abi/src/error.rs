//! Error types for the marshalling codec.

use thiserror::Error;

/// Codec error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a field could be read
    #[error("truncated input reading {field}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Bytes the field required
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Input continued past the end of the record
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// A text field was not valid UTF-8
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field being decoded
        field: &'static str,
    },

    /// A length does not fit the configured prefix width
    #[error("field {field} has length {len}, prefix allows at most {max}")]
    TooLong {
        /// Field being encoded
        field: &'static str,
        /// Actual length
        len: usize,
        /// Largest encodable length
        max: usize,
    },

    /// The same header key appeared twice
    #[error("duplicate header key {0:?}")]
    DuplicateHeader(String),

    /// Destination buffer is smaller than the encoded record
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Encoded size
        needed: usize,
        /// Destination size
        available: usize,
    },
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
