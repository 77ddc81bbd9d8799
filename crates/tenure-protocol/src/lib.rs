//! Wire protocol for tenure.
//!
//! This crate defines what travels between clients, the server, and the
//! shared session store:
//!
//! - **Types** ([`Notice`], [`ClientSignal`], [`CloseCode`], [`Claims`],
//!   [`SessionId`]): channel messages and bearer-token contents.
//! - **Endpoint** ([`ChannelRequest`]): how a channel names its account
//!   and carries its token.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how structured values
//!   become bytes, both on the wire and in the store.
//!
//! ```text
//! Transport (text frames) → Protocol (signals, notices) → Session (authority)
//! ```

mod codec;
mod endpoint;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use endpoint::ChannelRequest;
pub use error::ProtocolError;
pub use types::{
    unix_timestamp, Claims, ClientSignal, CloseCode, Notice, NoticeKind,
    SessionId, HEARTBEAT_ACK, PONG,
};
