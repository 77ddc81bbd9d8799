//! Takeover arbitration: the login and logout paths.
//!
//! Per account the arbiter moves between two states:
//!
//! ```text
//! NoSession ──claim──→ HasSession(S1) ──claim──→ HasSession(S2)
//!     ↑                      │
//!     └──────release─────────┘
//! ```
//!
//! A claim on an account that already holds a session runs the takeover
//! sequence, in this order:
//!
//! 1. broadcast a `force_logout` notice to the account's channels
//! 2. close those channels (forced-logout code) and forget them
//! 3. remove the old session
//! 4. create the new session
//!
//! The notice and the close travel the same per-channel queue, so a
//! client always sees the notice first. The old session is deleted only
//! after its channels were told, so a reader sees either the old session
//! or the new one, never a gap with channels still attached.
//!
//! The whole sequence runs under the account's lock, which the handshake
//! path also takes. Two concurrent logins for one account therefore run
//! one after the other, and the second one evicts the first.
//!
//! If the store fails at any step the claim stops there and reports an
//! error; no new session exists and no token should be issued. Channels
//! already closed stay closed.
//!
//! [`Arbiter::claim_with`] runs one more step (issuing the token) before
//! the lock is released. If that step fails, the session just created is
//! removed while the lock is still held, so the rollback can't touch a
//! session that a later login created.

use std::sync::Arc;

use tenure_protocol::{Notice, SessionId};
use tenure_registry::ConnectionRegistry;
use tenure_session::{Session, SessionAuthority, SessionStore};

use crate::TenureError;

/// Outcome of [`Arbiter::claim`].
#[derive(Debug, Clone)]
pub struct Claim {
    /// The account's new and only session.
    pub session: Session,
    /// The session it replaced, if there was one.
    pub replaced: Option<SessionId>,
    /// Channels that received the `force_logout` notice.
    pub notified: usize,
    /// Channels closed by the takeover.
    pub evicted: usize,
}

/// Outcome of [`Arbiter::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Whether a session existed and was removed.
    pub removed: bool,
    /// Channels closed.
    pub evicted: usize,
}

/// Transfers authority over an account from one session to the next.
pub struct Arbiter<S: SessionStore> {
    authority: Arc<SessionAuthority<S>>,
    registry: Arc<ConnectionRegistry>,
}

impl<S: SessionStore> Arbiter<S> {
    pub fn new(authority: Arc<SessionAuthority<S>>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            authority,
            registry,
        }
    }

    /// Makes a fresh session the account's only one, evicting whatever
    /// held it before.
    ///
    /// Channels still open for the account are evicted even when no
    /// session record is left (it expired while they stayed connected).
    pub async fn claim(&self, username: &str) -> Result<Claim, TenureError> {
        let (claim, ()) = self.claim_with(username, |_| Ok(())).await?;
        Ok(claim)
    }

    /// [`claim`](Self::claim), then `finish` on the new session, all under
    /// the account's lock.
    ///
    /// If `finish` fails the new session is removed before the lock is
    /// released and `finish`'s error is returned.
    pub async fn claim_with<R>(
        &self,
        username: &str,
        finish: impl FnOnce(&Session) -> Result<R, TenureError>,
    ) -> Result<(Claim, R), TenureError> {
        let _guard = self.authority.lock_account(username).await;

        let replaced = self.authority.try_current_session_id(username).await?;
        let has_channels = self.registry.channel_count(username).await > 0;

        let (mut notified, mut evicted) = (0, 0);
        if replaced.is_some() || has_channels {
            notified = self
                .registry
                .broadcast(username, &Notice::force_logout())
                .await;
            evicted = self.registry.force_evict_all(username).await;
            if replaced.is_some() {
                self.authority.try_remove_session(username).await?;
            }
            tracing::info!(
                %username,
                replaced = ?replaced.as_ref().map(SessionId::as_str),
                notified,
                evicted,
                "takeover: previous login evicted"
            );
        }

        let session = self.authority.create_session(username).await?;
        let output = match finish(&session) {
            Ok(output) => output,
            Err(e) => {
                if let Err(rollback) = self.authority.try_remove_session(username).await {
                    tracing::warn!(
                        %username,
                        session_id = %session.session_id,
                        error = %rollback,
                        "could not roll back unfinished session"
                    );
                }
                return Err(e);
            }
        };

        Ok((
            Claim {
                session,
                replaced,
                notified,
                evicted,
            },
            output,
        ))
    }

    /// Ends the account's session and closes its channels.
    pub async fn release(&self, username: &str) -> Result<Release, TenureError> {
        let _guard = self.authority.lock_account(username).await;

        let evicted = self.registry.force_evict_all(username).await;
        let removed = self.authority.try_remove_session(username).await?;

        tracing::info!(%username, removed, evicted, "logout");
        Ok(Release { removed, evicted })
    }
}
