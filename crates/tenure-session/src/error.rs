//! Error types for the session layer.

use tenure_protocol::{ProtocolError, SessionId};

/// Errors raised by a [`SessionStore`](crate::SessionStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store can't be reached (connection refused, timed out, or
    /// switched off in tests).
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// A key holds a different kind of value than the operation expects,
    /// e.g. `SADD` against a string key.
    #[error("wrong value type at key {0}")]
    WrongType(String),

    /// The backend returned an error that fits neither case above.
    #[error("session store error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Unavailable(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            Self::WrongType(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Errors that can occur during session management and login.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The username isn't known to the [`Authenticator`](crate::Authenticator).
    #[error("unknown account {0}")]
    UnknownAccount(String),

    /// The password didn't match.
    #[error("invalid credentials for account {0}")]
    InvalidCredentials(String),

    /// No session record exists for this identifier (never created,
    /// removed by takeover or logout, or expired).
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The shared store failed while reading or writing session state.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored record couldn't be encoded or decoded.
    #[error("corrupt session record: {0}")]
    Codec(#[from] ProtocolError),
}

impl SessionError {
    /// `true` for failures of the shared store itself, as opposed to a
    /// lookup that simply found nothing.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Codec(_))
    }
}

/// Why a bearer token was rejected or couldn't be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token isn't a structurally valid token at all.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The token parsed but its signature doesn't verify.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The token verified but its `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// Signing a new token failed.
    #[error("token issuance failed: {0}")]
    Issue(String),
}
