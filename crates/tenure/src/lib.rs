//! # Tenure
//!
//! Single active login per account.
//!
//! Every account holds at most one authoritative session. A new login
//! takes the account over: the previous login's real-time channels get a
//! `force_logout` notice and are closed, its session is removed, and only
//! then is the new session created and its token issued. Channels open
//! only with a token whose session still exists, and stay open only while
//! the client keeps talking.
//!
//! ## Layers
//!
//! ```text
//! TenureServer ─┬─ channel handler (per connection) ─┐
//!               ├─ Gateway: login / logout / listings ├─→ ConnectionRegistry (this process)
//!               └─ Reaper (background)               ─┘─→ SessionAuthority   (shared store)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tenure::prelude::*;
//!
//! # async fn run() -> Result<(), TenureError> {
//! let users = StaticDirectory::new().with_user("alice", "Alice", "wonderland", false);
//! let issuer = JwtIssuer::new(b"change-me", Duration::from_secs(3600));
//!
//! let server = TenureServer::<MemoryStore, StaticDirectory, JwtIssuer>::builder()
//!     .bind("0.0.0.0:8000")
//!     .build(MemoryStore::new(), users, issuer)
//!     .await?;
//!
//! let gateway = server.gateway();
//! let login = gateway.login("alice", "wonderland").await?;
//! // The client now opens ws://host:8000/ws/alice?token={login.access_token}
//! # let _ = login;
//! server.run().await
//! # }
//! ```

mod arbiter;
mod config;
mod error;
mod gateway;
mod handler;
mod server;

pub use arbiter::{Arbiter, Claim, Release};
pub use config::ChannelConfig;
pub use error::{ErrorKind, TenureError};
pub use gateway::{
    AccountSummary, ActiveSessionEntry, ActiveSessionsReport, Gateway, HealthReport,
    LoginResponse, LogoutResponse, StoreStatus,
};
pub use server::{TenureServer, TenureServerBuilder};

/// Common imports for running a tenure server.
pub mod prelude {
    pub use crate::{
        ChannelConfig, ErrorKind, Gateway, TenureError, TenureServer, TenureServerBuilder,
    };
    pub use tenure_protocol::{Claims, CloseCode, Notice, NoticeKind, SessionId};
    pub use tenure_reaper::ReaperConfig;
    pub use tenure_registry::RegistryConfig;
    #[cfg(feature = "redis")]
    pub use tenure_session::RedisStore;
    pub use tenure_session::{
        Authenticator, JwtIssuer, MemoryStore, SessionConfig, SessionError, SessionStore,
        StaticDirectory, TokenIssuer, UserProfile,
    };
}
