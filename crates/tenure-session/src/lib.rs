//! Session authority for tenure.
//!
//! This crate decides which login instance currently holds each account:
//!
//! 1. **Storage**: the [`SessionStore`] trait over a shared key-value
//!    store with TTLs and sets ([`MemoryStore`], and `RedisStore` behind
//!    the `redis` feature)
//! 2. **Authority**: [`SessionAuthority`] creates, reads, touches,
//!    removes, lists, and sweeps sessions on top of the store
//! 3. **Credentials**: the [`Authenticator`] trait that checks a
//!    username/password pair
//! 4. **Tokens**: the [`TokenIssuer`] trait that signs and verifies
//!    bearer tokens ([`JwtIssuer`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Arbitrator / channel handler (above)  ← login, logout, heartbeat touch
//!     ↕
//! Session Layer (this crate)  ← authoritative session per account
//!     ↕
//! Protocol Layer (below)  ← SessionId, Claims, JsonCodec
//! ```
//!
//! # Feature Flags
//!
//! - `redis`: [`RedisStore`], a [`SessionStore`] backed by a Redis server

#![allow(async_fn_in_trait)]

mod auth;
mod authority;
mod error;
mod keys;
mod locks;
#[cfg(feature = "redis")]
mod redis_store;
mod session;
mod store;
mod token;

pub use auth::{Authenticator, StaticDirectory, UserProfile};
pub use authority::SessionAuthority;
pub use error::{SessionError, StoreError, TokenError};
pub use keys::{
    breadcrumb_key, session_key, user_session_key, ACTIVE_SESSIONS_KEY,
    CACHED_ACTIVE_SESSIONS_KEY,
};
pub use locks::{AccountGuard, AccountLocks};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use session::{ChannelBreadcrumb, Session, SessionConfig};
pub use store::{MemoryStore, SessionStore};
pub use token::{JwtIssuer, TokenIssuer};
