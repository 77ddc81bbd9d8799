//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or interpreting
/// wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or the
    /// wrong shape for the target type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The data parsed but violates the protocol, e.g. a channel request
    /// path that doesn't name an account.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
