//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or converting values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// JSON text could not be parsed or does not describe a document.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Description of the JSON error.
        message: String,
    },

    /// A value could not be coerced to the requested type.
    #[error("{message}")]
    Conversion {
        /// User-facing error code.
        code: u32,
        /// Description of the failed conversion.
        message: String,
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

    /// Create an invalid JSON error.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Create a conversion error carrying a user-facing code.
    pub fn conversion(code: u32, message: impl Into<String>) -> Self {
        Self::Conversion {
            code,
            message: message.into(),
        }
    }

    /// Returns the user-facing code of a conversion error.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Conversion { code, .. } => Some(*code),
            _ => None,
        }
    }
}
