//! Core protocol types.
//!
//! Channel traffic is deliberately asymmetric: clients send bare text
//! (`ping`, `heartbeat`, or anything else), the server answers liveness
//! probes with bare text (`pong`, `heartbeat_ack`) and announces state
//! changes with structured JSON [`Notice`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier of one authoritative login instance.
///
/// Serialized as the bare string, so a `SessionId("abc")` is `"abc"` in
/// JSON and in store keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrows the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claims carried by a bearer token.
///
/// Immutable once issued. The server compares them against current
/// session state every time the token is used; holding a valid token is
/// not proof that its session still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The account the token was issued to.
    pub sub: String,
    /// The session the token was issued for.
    pub session_id: SessionId,
    /// Expiry as seconds since the Unix epoch.
    pub exp: i64,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Reply to a client `ping`.
pub const PONG: &str = "pong";

/// Reply to a client `heartbeat`.
pub const HEARTBEAT_ACK: &str = "heartbeat_ack";

/// What a [`Notice`] announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// The channel passed the handshake and is established.
    ConnectionEstablished,
    /// The account logged in elsewhere; this channel is about to close.
    ForceLogout,
}

/// A structured server notice: `{"type": ..., "message": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(rename = "type")]
    pub kind: NoticeKind,
    pub message: String,
    /// Seconds since the Unix epoch, with sub-second precision.
    pub timestamp: f64,
}

impl Notice {
    /// Builds a notice stamped with the current time.
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: unix_timestamp(),
        }
    }

    /// The notice sent once a channel reaches `Established`.
    pub fn connection_established() -> Self {
        Self::new(
            NoticeKind::ConnectionEstablished,
            "Real-time channel established.",
        )
    }

    /// The notice broadcast to an account's channels during takeover.
    pub fn force_logout() -> Self {
        Self::new(
            NoticeKind::ForceLogout,
            "Your account signed in from another location; this session has been logged out.",
        )
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// An inbound frame, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSignal {
    /// Pure liveness probe; answered with [`PONG`].
    Ping,
    /// Liveness plus session keep-alive; answered with [`HEARTBEAT_ACK`].
    Heartbeat,
    /// Anything else. Informational only.
    Text(String),
}

impl ClientSignal {
    /// Classifies a received text frame. Matching is exact: `"Ping"` or
    /// `" ping"` are plain text.
    pub fn parse(frame: &str) -> Self {
        match frame {
            "ping" => Self::Ping,
            "heartbeat" => Self::Heartbeat,
            other => Self::Text(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Why the server closed a channel.
///
/// Each variant maps to a fixed numeric code and reason string; clients
/// key their reconnect behaviour off these, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// No `token` query parameter.
    TokenMissing,
    /// Token subject differs from the account in the path.
    SubjectMismatch,
    /// Token is malformed or its signature doesn't verify.
    TokenInvalid,
    /// The account already holds the maximum number of channels.
    ConnectionLimitExceeded,
    /// Token signature is valid but it has expired.
    TokenExpired,
    /// Token is valid but its session no longer exists.
    SessionRevoked,
    /// The request target isn't `/ws/{account}`.
    InvalidEndpoint,
    /// Orderly close initiated by the server.
    Normal,
    /// No inbound signal within the liveness window.
    Timeout,
    /// Closed because the account logged in elsewhere.
    ForcedLogout,
    /// The server hit an unexpected fault.
    InternalError,
}

impl CloseCode {
    /// The numeric close code sent in the close frame.
    pub fn code(self) -> u16 {
        match self {
            Self::TokenMissing => 4001,
            Self::SubjectMismatch => 4002,
            Self::TokenInvalid => 4003,
            Self::ConnectionLimitExceeded => 4004,
            Self::TokenExpired => 4005,
            Self::SessionRevoked => 4006,
            Self::InvalidEndpoint => 1008,
            Self::Normal | Self::Timeout | Self::ForcedLogout => 1000,
            Self::InternalError => 1011,
        }
    }

    /// The reason string sent in the close frame.
    pub fn reason(self) -> &'static str {
        match self {
            Self::TokenMissing => "Token missing",
            Self::SubjectMismatch => "User ID mismatch",
            Self::TokenInvalid => "Token validation failed",
            Self::ConnectionLimitExceeded => "Connection limit exceeded",
            Self::TokenExpired => "Token expired",
            Self::SessionRevoked => "Session revoked",
            Self::InvalidEndpoint => "Invalid channel path",
            Self::Normal => "Normal closure",
            Self::Timeout => "Timeout",
            Self::ForcedLogout => "Force disconnect",
            Self::InternalError => "Internal error",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}
