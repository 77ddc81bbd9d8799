//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The same codec encodes server notices sent over channels and the
//! session records kept in the shared store, so the store layout and the
//! wire stay in one format.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every channel task and the session authority for the life of the
/// server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Serializes a value into a UTF-8 string, for text frames and
    /// string-valued store keys.
    fn encode_text<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<String, ProtocolError> {
        let bytes = self.encode(value)?;
        String::from_utf8(bytes).map_err(|e| {
            ProtocolError::InvalidMessage(format!("codec produced non-UTF-8 output: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what browser clients expect for channel notices, and it keeps
/// store records readable from `redis-cli`.
///
/// ## Example
///
/// ```rust
/// use tenure_protocol::{Codec, JsonCodec, Notice, NoticeKind};
///
/// let codec = JsonCodec;
/// let notice = Notice::force_logout();
///
/// let text = codec.encode_text(&notice).unwrap();
/// assert!(text.contains("\"type\":\"force_logout\""));
///
/// let decoded: Notice = codec.decode(text.as_bytes()).unwrap();
/// assert_eq!(decoded.kind, NoticeKind::ForceLogout);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
