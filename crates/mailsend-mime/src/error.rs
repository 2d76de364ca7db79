//! Error types for MIME operations.

use std::io;

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid MIME header.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Multipart entity without a boundary parameter.
    #[error("No boundary found for multipart entity")]
    MissingBoundary,

    /// Invalid multipart structure.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),

    /// MIME entity without a Content-Type.
    #[error("No Content-Type found for MIME entity")]
    MissingContentType,

    /// No `From` address or no recipient address.
    #[error("Must specify at least one From address and one To address")]
    MissingAddress,

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// I/O error while reading message or attachment content.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
