//! Transport abstraction layer for tenure.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the channel
//! handler is written against, so the handshake and heartbeat logic never
//! touches a concrete socket type.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connection, unique within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw id. Ids handed out by a transport are never reused
    /// within the process.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id, as used in store keys.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A listener that yields upgraded channel connections.
pub trait Transport: Send + Sync + 'static {
    /// What [`accept`](Self::accept) yields.
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next client and completes its upgrade.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting. Connections already handed out are unaffected.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single text-framed connection.
///
/// `send` and `recv` may be awaited concurrently from different tasks;
/// implementations must not serialize one behind the other.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text frame to the remote peer.
    fn send(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next text frame from the remote peer.
    ///
    /// `Ok(None)` means the peer closed the connection or went away.
    fn recv(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Closes the connection with a numeric code and a short reason.
    fn close(
        &self,
        code: u16,
        reason: &str,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Process-unique id, assigned at accept time.
    fn id(&self) -> ConnectionId;

    /// The request target the client opened the connection with,
    /// e.g. `/ws/alice?token=...`.
    fn request_path(&self) -> &str;
}
