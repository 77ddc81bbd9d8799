//! The service surface: login, logout, listings, and health.
//!
//! [`Gateway`] is what an HTTP layer (or the demo binary) calls. It owns
//! the shared state every channel handler also works against.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenure_protocol::{unix_timestamp, Codec, JsonCodec, SessionId};
use tenure_registry::ConnectionRegistry;
use tenure_session::{
    Authenticator, SessionAuthority, SessionStore, TokenIssuer, UserProfile,
    CACHED_ACTIVE_SESSIONS_KEY,
};

use crate::arbiter::{Arbiter, Release};
use crate::{ChannelConfig, TenureError};

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserProfile,
    pub session_id: SessionId,
}

/// Result of a logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub username: String,
    /// `false` if there was no session to end.
    pub removed: bool,
    pub channels_closed: usize,
}

/// One row of the active-sessions report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSessionEntry {
    pub username: String,
    pub session_id: SessionId,
    /// When the session was created.
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Channels this instance holds for the account.
    pub websocket_count: usize,
}

/// Every active session, as of `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSessionsReport {
    pub sessions: Vec<ActiveSessionEntry>,
    pub count: usize,
    pub timestamp: f64,
}

/// A known account and whether it is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub username: String,
    pub name: String,
    pub is_admin: bool,
    pub is_active: bool,
}

/// Reachability of the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Connected,
    Disconnected,
}

/// Liveness and load of this instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `healthy`, or `degraded` while the store is unreachable. In the
    /// degraded state duplicate-login protection is off.
    pub status: String,
    pub timestamp: f64,
    pub store: StoreStatus,
    /// Store failures absorbed since startup.
    pub store_failures: u64,
    /// Channels open on this instance.
    pub active_connections: usize,
    pub active_sessions: usize,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Shared server state and the operations clients invoke on it.
///
/// Wrapped in `Arc` and handed to every channel task.
pub struct Gateway<S: SessionStore, A: Authenticator, T: TokenIssuer> {
    pub(crate) authority: Arc<SessionAuthority<S>>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) arbiter: Arbiter<S>,
    pub(crate) authenticator: A,
    pub(crate) issuer: T,
    pub(crate) codec: JsonCodec,
    pub(crate) channel: ChannelConfig,
}

impl<S, A, T> Gateway<S, A, T>
where
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    pub fn new(
        authority: Arc<SessionAuthority<S>>,
        registry: Arc<ConnectionRegistry>,
        authenticator: A,
        issuer: T,
        channel: ChannelConfig,
    ) -> Self {
        Self {
            arbiter: Arbiter::new(Arc::clone(&authority), Arc::clone(&registry)),
            authority,
            registry,
            authenticator,
            issuer,
            codec: JsonCodec,
            channel,
        }
    }

    pub fn authority(&self) -> &Arc<SessionAuthority<S>> {
        &self.authority
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn issuer(&self) -> &T {
        &self.issuer
    }

    /// Checks credentials, takes the account over from any earlier login,
    /// and issues a token for the new session.
    ///
    /// # Errors
    /// - unknown account or wrong password: [`ErrorKind::Unauthorized`]
    /// - store failure anywhere in the takeover: [`ErrorKind::Internal`];
    ///   no session is left behind and no token is issued
    /// - token signing failure: [`ErrorKind::Internal`]; the new session is
    ///   removed before the account's lock is released
    ///
    /// [`ErrorKind::Unauthorized`]: crate::ErrorKind::Unauthorized
    /// [`ErrorKind::Internal`]: crate::ErrorKind::Internal
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, TenureError> {
        let user = match self.authenticator.authenticate(username, password).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(%username, error = %e, "login rejected");
                return Err(e.into());
            }
        };

        let (claim, access_token) = self
            .arbiter
            .claim_with(username, |session| {
                let claims = self.issuer.claims_for(username, &session.session_id);
                Ok(self.issuer.issue(&claims)?)
            })
            .await?;
        let session_id = claim.session.session_id;

        tracing::info!(%username, %session_id, "login succeeded");
        Ok(LoginResponse {
            access_token,
            user,
            session_id,
        })
    }

    /// Ends the account's session and closes its channels. Succeeds when
    /// there was nothing to end.
    pub async fn logout(&self, username: &str) -> Result<LogoutResponse, TenureError> {
        let Release { removed, evicted } = self.arbiter.release(username).await?;
        Ok(LogoutResponse {
            username: username.to_string(),
            removed,
            channels_closed: evicted,
        })
    }

    /// Every active session with its channel count.
    ///
    /// Served from a store-side cache for `listing_cache_ttl` so repeated
    /// polling doesn't rescan the store.
    pub async fn active_sessions(&self) -> Result<ActiveSessionsReport, TenureError> {
        let store = self.authority.store();
        match store.get(CACHED_ACTIVE_SESSIONS_KEY).await {
            Ok(Some(cached)) => match self.codec.decode(cached.as_bytes()) {
                Ok(report) => return Ok(report),
                Err(e) => tracing::debug!(error = %e, "discarding unreadable listing cache"),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "listing cache unavailable"),
        }

        let sessions = self
            .authority
            .try_sessions()
            .await
            .map_err(|e| TenureError::Internal(format!("listing active sessions: {e}")))?;
        let counts = self.registry.channel_counts().await;
        let sessions: Vec<ActiveSessionEntry> = sessions
            .into_iter()
            .map(|s| ActiveSessionEntry {
                websocket_count: counts.get(&s.username).copied().unwrap_or(0),
                username: s.username,
                session_id: s.session_id,
                connected_at: s.created_at,
                last_activity: s.last_activity,
            })
            .collect();
        let report = ActiveSessionsReport {
            count: sessions.len(),
            sessions,
            timestamp: unix_timestamp(),
        };

        let ttl = self.authority.config().listing_cache_ttl;
        match self.codec.encode_text(&report) {
            Ok(text) => {
                if let Err(e) = store.set_ex(CACHED_ACTIVE_SESSIONS_KEY, &text, ttl).await {
                    tracing::debug!(error = %e, "could not cache listing");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not encode listing"),
        }
        Ok(report)
    }

    /// Every account the authenticator knows, with its sign-in state.
    pub async fn users(&self) -> Vec<AccountSummary> {
        let mut users = Vec::new();
        for profile in self.authenticator.directory().await {
            let is_active = self.authority.is_active(&profile.username).await;
            users.push(AccountSummary {
                username: profile.username,
                name: profile.name,
                is_admin: profile.is_admin,
                is_active,
            });
        }
        users
    }

    /// Store reachability and load figures.
    pub async fn health(&self) -> HealthReport {
        let store = match self.authority.store().ping().await {
            Ok(()) => StoreStatus::Connected,
            Err(e) => {
                tracing::warn!(error = %e, "health: store unreachable");
                StoreStatus::Disconnected
            }
        };
        let status = match store {
            StoreStatus::Connected => "healthy",
            StoreStatus::Disconnected => "degraded",
        };
        HealthReport {
            status: status.to_string(),
            timestamp: unix_timestamp(),
            store,
            store_failures: self.authority.store_failures(),
            active_connections: self.registry.total_channels().await,
            active_sessions: self.authority.list_active().await.len(),
        }
    }
}
