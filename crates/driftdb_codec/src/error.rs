//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to serialize a persisted record.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to deserialize a persisted record.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Input ended in the middle of an encoded field.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Offset at which more input was expected.
        offset: usize,
    },

    /// An escape sequence that the ordered code writer never produces.
    #[error("invalid escape sequence 0x{first:02x} 0x{second:02x} at offset {offset}")]
    InvalidEscape {
        /// First byte of the sequence.
        first: u8,
        /// Second byte of the sequence.
        second: u8,
        /// Offset of the first byte.
        offset: usize,
    },

    /// A length prefix outside the valid range.
    #[error("invalid number length {length} at offset {offset}")]
    InvalidNumberLength {
        /// Decoded length.
        length: usize,
        /// Offset of the length byte.
        offset: usize,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Invalid base64 input.
    #[error("invalid base64: {message}")]
    InvalidBase64 {
        /// Description of the error.
        message: String,
    },

    /// A timestamp outside the supported range.
    #[error("invalid timestamp: seconds={seconds}, nanos={nanos}")]
    InvalidTimestamp {
        /// Seconds since the epoch.
        seconds: i64,
        /// Nanosecond fraction.
        nanos: i32,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
