//! Error types for avp-engine
//!
//! Defines engine error types using thiserror for clear error propagation.

use crate::media::StreamKind;
use thiserror::Error;

/// Main error type for avp-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Source or codec could not be initialized
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    /// Malformed packet or decoder failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Seek primitive failure
    #[error("Seek error: {0}")]
    Seek(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from shared AVP code
    #[error(transparent)]
    Common(#[from] avp_common::Error),
}

/// Reasons an Open can fail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// Url is empty or its parameters cannot be parsed
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No registered backend accepts the url
    #[error("no backend accepts url '{0}'")]
    UnsupportedUrl(String),

    /// Source exists but the container cannot be read
    #[error("cannot read '{url}': {reason}")]
    Unreadable { url: String, reason: String },

    /// Container lacks the required stream
    #[error("missing {0} stream")]
    MissingStream(StreamKind),

    /// Stream present but no decoder is available for it
    #[error("unsupported {kind} codec '{codec}'")]
    UnsupportedCodec { kind: StreamKind, codec: String },
}

/// Result of reading one packet from a media source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// End of stream; not a failure
    #[error("end of stream")]
    EndOfStream,

    /// Transient demux failure, retried by the reader
    #[error("transient read failure: {0}")]
    Transient(String),
}

/// Convenience Result type using avp-engine Error
pub type Result<T> = std::result::Result<T, Error>;
