//! Error types for MIME decoding.
//!
//! Parsing a [`Message`](crate::Message) never fails; these errors only
//! surface from the explicit fallible accessors such as
//! [`Part::decode_body`](crate::Part::decode_body).

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
