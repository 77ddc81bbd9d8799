//! Session types: the record that says which login instance holds an
//! account, and the knobs that bound its lifetime.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenure_protocol::SessionId;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Lifetimes of the keys the authority writes.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// TTL of the session record and the username index entry. A session
    /// that sees no heartbeat for this long is gone.
    ///
    /// Default: 1 hour.
    pub session_ttl: Duration,

    /// TTL of per-channel breadcrumbs. Only bounds how long a stale
    /// breadcrumb can linger after a crash.
    ///
    /// Default: 2 hours.
    pub breadcrumb_ttl: Duration,

    /// How long the active-sessions report may be served from cache.
    ///
    /// Default: 5 seconds.
    pub listing_cache_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            breadcrumb_ttl: Duration::from_secs(7200),
            listing_cache_ttl: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One authoritative login instance for an account.
///
/// Stored as JSON under `session:{session_id}`. Only [`SessionAuthority`]
/// writes it; everything else gets copies.
///
/// [`SessionAuthority`]: crate::SessionAuthority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    /// Advanced only by an explicit touch, never by reads.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(username: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::generate(),
            username: username.to_string(),
            created_at: now,
            last_activity: now,
        }
    }

    /// `true` if no activity has been recorded for longer than `ttl`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.last_activity > ttl,
            // A TTL beyond chrono's range never elapses.
            Err(_) => false,
        }
    }
}

/// Observability record written for each admitted channel.
///
/// Never read back for admission decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBreadcrumb {
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    /// Channels the account held, this one included, when it was admitted.
    pub websocket_count: usize,
}
