//! Unified error type for tenure.

use tenure_protocol::ProtocolError;
use tenure_session::{SessionError, TokenError};
use tenure_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically. Use [`kind`](Self::kind) to decide what a client
/// gets told.
#[derive(Debug, thiserror::Error)]
pub enum TenureError {
    /// A transport-level error (accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, bad endpoint).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (credentials, missing session, store).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A bearer token couldn't be issued or verified.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The caller isn't allowed to do this.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Anything else that went wrong on the server side.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The externally visible class of a [`TenureError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad credentials or token. The client can fix it.
    Unauthorized,
    /// The server failed. Retrying later may help.
    Internal,
}

impl TenureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_)
            | Self::Session(SessionError::UnknownAccount(_))
            | Self::Session(SessionError::InvalidCredentials(_))
            | Self::Token(TokenError::Malformed(_))
            | Self::Token(TokenError::InvalidSignature)
            | Self::Token(TokenError::Expired) => ErrorKind::Unauthorized,
            _ => ErrorKind::Internal,
        }
    }
}
