//! The session authority: sole owner of session lifecycle.
//!
//! Three structures in the shared store describe who holds an account:
//!
//! ```text
//! session:{id}          → Session record (JSON)        TTL = session_ttl
//! user_session:{user}   → id of the current session    TTL = session_ttl
//! active_sessions       → set of usernames             TTL = session_ttl
//! ```
//!
//! The store can't write them atomically, so a crash or a store failure
//! between writes can leave them out of step (an index with no record, a
//! set member with no index). Reads tolerate that, and
//! [`SessionAuthority::sweep_expired`] repairs it.
//!
//! Redis can't expire individual set members, so the whole
//! `active_sessions` set is re-armed on every create and touch. A member
//! whose session has expired stays in the set until the next sweep.
//!
//! # Soft and strict operations
//!
//! Every public operation has a soft form that never fails on store
//! trouble: it logs, counts the failure, and returns the empty answer
//! (`false`, `0`, an empty set, `NotFound`). That is the right behaviour
//! for request paths that should keep serving when the store is down.
//! The `try_*` forms return the store error instead; the takeover path and
//! the reaper use them so they can abort or report.
//!
//! None of these methods take the per-account lock themselves. Callers
//! that need a multi-step sequence to be exclusive (login, logout) hold
//! [`SessionAuthority::lock_account`] around it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tenure_protocol::{Codec, JsonCodec, SessionId};

use crate::keys::{breadcrumb_key, session_key, user_session_key, ACTIVE_SESSIONS_KEY};
use crate::{
    AccountGuard, AccountLocks, ChannelBreadcrumb, Session, SessionConfig,
    SessionError, SessionStore,
};

/// Creates, reads, refreshes, and removes sessions in a [`SessionStore`].
pub struct SessionAuthority<S: SessionStore> {
    store: S,
    config: SessionConfig,
    codec: JsonCodec,
    locks: AccountLocks,
    store_failures: AtomicU64,
}

impl<S: SessionStore> SessionAuthority<S> {
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            codec: JsonCodec,
            locks: AccountLocks::new(),
            store_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying store, for callers that keep their own keys in it
    /// (listing cache, health probe).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store failures absorbed by soft operations since startup.
    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    /// Serializes multi-step work on one account. See [`AccountLocks`].
    pub async fn lock_account(&self, username: &str) -> AccountGuard {
        self.locks.acquire(username).await
    }

    // -----------------------------------------------------------------------
    // Create / read
    // -----------------------------------------------------------------------

    /// Starts a new session for `username` and makes it the account's
    /// current one.
    ///
    /// Writes the record, then the index, then the set membership. A
    /// failure part way leaves whatever was already written for the sweep
    /// to repair; the error is returned so no token is issued for it.
    ///
    /// Does not look for an existing session. Replacing one is the
    /// caller's job (see the takeover arbitrator).
    pub async fn create_session(&self, username: &str) -> Result<Session, SessionError> {
        let session = Session::new(username);
        let ttl = self.config.session_ttl;
        let record = self.codec.encode_text(&session)?;

        self.store
            .set_ex(&session_key(&session.session_id), &record, ttl)
            .await?;
        self.store
            .set_ex(&user_session_key(username), session.session_id.as_str(), ttl)
            .await?;
        self.store.sadd(ACTIVE_SESSIONS_KEY, username).await?;
        self.store.expire(ACTIVE_SESSIONS_KEY, ttl).await?;

        tracing::info!(%username, session_id = %session.session_id, "session created");
        Ok(session)
    }

    /// Loads a session record. Never refreshes its TTL.
    ///
    /// A store failure is reported as `NotFound`.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        match self.try_get_session(session_id).await {
            Err(e) if e.is_store_failure() => {
                self.note_failure("get_session", &e);
                Err(SessionError::NotFound(session_id.clone()))
            }
            other => other,
        }
    }

    /// Strict form of [`get_session`](Self::get_session).
    pub async fn try_get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Session, SessionError> {
        self.load(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))
    }

    /// The id the account's index entry points at, if any. The record it
    /// names may be missing.
    pub async fn try_current_session_id(
        &self,
        username: &str,
    ) -> Result<Option<SessionId>, SessionError> {
        let id = self.store.get(&user_session_key(username)).await?;
        Ok(id.map(SessionId::from))
    }

    /// `true` iff the account has an index entry. Doesn't check that the
    /// record behind it exists.
    pub async fn is_active(&self, username: &str) -> bool {
        let result = self.try_is_active(username).await;
        self.degrade("is_active", result, false)
    }

    /// Strict form of [`is_active`](Self::is_active).
    pub async fn try_is_active(&self, username: &str) -> Result<bool, SessionError> {
        Ok(self.store.exists(&user_session_key(username)).await?)
    }

    /// Usernames in the active set.
    pub async fn list_active(&self) -> BTreeSet<String> {
        let result = self.try_list_active().await;
        self.degrade("list_active", result, BTreeSet::new())
    }

    /// Strict form of [`list_active`](Self::list_active).
    pub async fn try_list_active(&self) -> Result<BTreeSet<String>, SessionError> {
        let members = self.store.smembers(ACTIVE_SESSIONS_KEY).await?;
        Ok(members.into_iter().collect())
    }

    /// Current sessions of every active account, by username. Accounts
    /// whose index or record is missing are skipped.
    pub async fn try_sessions(&self) -> Result<Vec<Session>, SessionError> {
        let mut sessions = Vec::new();
        for username in self.try_list_active().await? {
            let Some(id) = self.try_current_session_id(&username).await? else {
                continue;
            };
            match self.load(&id).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(SessionError::Codec(e)) => {
                    tracing::warn!(%username, session_id = %id, error = %e, "skipping corrupt session record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    // -----------------------------------------------------------------------
    // Touch
    // -----------------------------------------------------------------------

    /// Records activity on a session and extends its lifetime.
    ///
    /// The record is rewritten with a fresh TTL first, and only if it still
    /// exists: a takeover that deletes the record between the read and the
    /// write makes the touch report `NotFound` instead of bringing the
    /// session back. The index entry and the active set are re-armed
    /// afterwards in separate writes, and only if the index still points
    /// at this session. If those later writes fail, the record outlives its
    /// index until the index's own TTL runs out; that skew is tolerated.
    ///
    /// A store failure is reported as `NotFound`.
    pub async fn touch(&self, session_id: &SessionId) -> Result<(), SessionError> {
        match self.try_touch(session_id).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_store_failure() => {
                self.note_failure("touch", &e);
                Err(SessionError::NotFound(session_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Strict form of [`touch`](Self::touch). Returns the updated record.
    pub async fn try_touch(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        let mut session = self.try_get_session(session_id).await?;
        session.last_activity = Utc::now();
        let ttl = self.config.session_ttl;
        let record = self.codec.encode_text(&session)?;
        let rewritten = self
            .store
            .set_ex_if_exists(&session_key(session_id), &record, ttl)
            .await?;
        if !rewritten {
            return Err(SessionError::NotFound(session_id.clone()));
        }

        let index = user_session_key(&session.username);
        let refresh = async {
            if self.store.get(&index).await?.as_deref() == Some(session_id.as_str()) {
                self.store.expire(&index, ttl).await?;
                self.store.expire(ACTIVE_SESSIONS_KEY, ttl).await?;
            }
            Ok::<_, SessionError>(())
        };
        if let Err(e) = refresh.await {
            self.note_failure("touch index", &e);
        }

        tracing::debug!(username = %session.username, %session_id, "session touched");
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Remove / sweep
    // -----------------------------------------------------------------------

    /// Ends the account's current session. Returns `true` if there was one.
    ///
    /// Idempotent: a second call returns `false` and leaves no keys behind.
    pub async fn remove_session(&self, username: &str) -> bool {
        let result = self.try_remove_session(username).await;
        self.degrade("remove_session", result, false)
    }

    /// Strict form of [`remove_session`](Self::remove_session).
    pub async fn try_remove_session(&self, username: &str) -> Result<bool, SessionError> {
        let index = user_session_key(username);
        let Some(id) = self.store.get(&index).await? else {
            // Nothing to remove, but a set member may have outlived its
            // index.
            self.store.srem(ACTIVE_SESSIONS_KEY, username).await?;
            return Ok(false);
        };
        let session_id = SessionId::from(id);

        self.store.delete(&session_key(&session_id)).await?;
        self.store.delete(&index).await?;
        self.store.srem(ACTIVE_SESSIONS_KEY, username).await?;

        tracing::info!(%username, %session_id, "session removed");
        Ok(true)
    }

    /// Removes sessions that should no longer exist and repairs drift.
    ///
    /// For each member of the active set, under that account's lock:
    ///
    /// - no index entry → the member is dropped from the set
    /// - index points at a missing or unreadable record → removed
    /// - record idle for longer than `session_ttl` → removed
    ///
    /// The store normally expires these keys itself; this catches keys that
    /// outlived their partners after a partial write.
    ///
    /// Returns the number of accounts cleaned up.
    pub async fn sweep_expired(&self) -> usize {
        let result = self.try_sweep_expired().await;
        self.degrade("sweep_expired", result, 0)
    }

    /// Strict form of [`sweep_expired`](Self::sweep_expired). Stops at the
    /// first store failure.
    pub async fn try_sweep_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut cleaned = 0;

        for username in self.try_list_active().await? {
            let _guard = self.lock_account(&username).await;

            let Some(id) = self.try_current_session_id(&username).await? else {
                self.store.srem(ACTIVE_SESSIONS_KEY, &username).await?;
                tracing::debug!(%username, "dropped set member without index");
                cleaned += 1;
                continue;
            };

            let reason = match self.load(&id).await {
                Ok(None) => "dangling index",
                Err(SessionError::Codec(_)) => "corrupt record",
                Err(e) => return Err(e),
                Ok(Some(session)) if session.is_stale(now, self.config.session_ttl) => {
                    "idle past ttl"
                }
                Ok(Some(_)) => continue,
            };
            self.try_remove_session(&username).await?;
            tracing::info!(%username, session_id = %id, reason, "swept session");
            cleaned += 1;
        }

        if cleaned > 0 {
            tracing::info!(cleaned, "session sweep finished");
        }
        Ok(cleaned)
    }

    // -----------------------------------------------------------------------
    // Channel breadcrumbs
    // -----------------------------------------------------------------------

    /// Leaves a short-lived note that `username` has channel `channel`
    /// open. Observability only; failures are logged and ignored.
    pub async fn record_channel(&self, username: &str, channel: u64, websocket_count: usize) {
        let crumb = ChannelBreadcrumb {
            user_id: username.to_string(),
            connected_at: Utc::now(),
            websocket_count,
        };
        let result = async {
            let value = self.codec.encode_text(&crumb)?;
            self.store
                .set_ex(
                    &breadcrumb_key(username, channel),
                    &value,
                    self.config.breadcrumb_ttl,
                )
                .await?;
            Ok::<_, SessionError>(())
        }
        .await;
        self.degrade("record_channel", result, ());
    }

    /// Deletes the note left by [`record_channel`](Self::record_channel).
    pub async fn clear_channel(&self, username: &str, channel: u64) {
        let result = self
            .store
            .delete(&breadcrumb_key(username, channel))
            .await
            .map(|_| ())
            .map_err(SessionError::from);
        self.degrade("clear_channel", result, ());
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load(&self, session_id: &SessionId) -> Result<Option<Session>, SessionError> {
        match self.store.get(&session_key(session_id)).await? {
            Some(record) => Ok(Some(self.codec.decode(record.as_bytes())?)),
            None => Ok(None),
        }
    }

    fn degrade<T>(&self, op: &'static str, result: Result<T, SessionError>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                self.note_failure(op, &e);
                fallback
            }
        }
    }

    fn note_failure(&self, op: &'static str, error: &SessionError) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op, %error, "session store degraded");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::MemoryStore;

    fn authority() -> SessionAuthority<MemoryStore> {
        SessionAuthority::new(MemoryStore::new(), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_session_writes_record_index_and_membership() {
        let auth = authority();
        let session = auth.create_session("alice").await.unwrap();

        assert!(auth.is_active("alice").await);
        assert_eq!(
            auth.try_current_session_id("alice").await.unwrap(),
            Some(session.session_id.clone())
        );
        assert!(auth.list_active().await.contains("alice"));
    }

    #[tokio::test]
    async fn test_get_session_unknown_id_returns_not_found() {
        let auth = authority();
        let result = auth.get_session(&SessionId::from("missing")).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_session_corrupt_record_is_codec_error() {
        let auth = authority();
        auth.store()
            .set_ex("session:bad", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let result = auth.try_get_session(&SessionId::from("bad")).await;
        assert!(matches!(result, Err(SessionError::Codec(_))));
    }

    #[tokio::test]
    async fn test_touch_advances_last_activity() {
        let auth = authority();
        let session = auth.create_session("alice").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let touched = auth.try_touch(&session.session_id).await.unwrap();

        assert!(touched.last_activity > session.last_activity);
        assert_eq!(touched.created_at, session.created_at);
    }

    #[tokio::test]
    async fn test_touch_unknown_session_returns_not_found() {
        let auth = authority();
        let result = auth.touch(&SessionId::from("ghost")).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_session_without_index_drops_stray_member() {
        let auth = authority();
        auth.store().sadd(ACTIVE_SESSIONS_KEY, "alice").await.unwrap();

        assert!(!auth.remove_session("alice").await);
        assert!(auth.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_soft_ops_degrade_and_count_failures() {
        let auth = authority();
        auth.create_session("alice").await.unwrap();
        auth.store().set_available(false);

        assert!(!auth.is_active("alice").await);
        assert!(auth.list_active().await.is_empty());
        assert!(!auth.remove_session("alice").await);
        assert_eq!(auth.sweep_expired().await, 0);
        assert_eq!(auth.store_failures(), 4);
    }

    #[tokio::test]
    async fn test_create_session_store_down_returns_store_error() {
        let auth = authority();
        auth.store().set_available(false);
        let result = auth.create_session("alice").await;
        assert!(matches!(result, Err(e) if e.is_store_failure()));
    }

    #[tokio::test]
    async fn test_record_and_clear_channel_breadcrumb() {
        let auth = authority();
        auth.record_channel("alice", 9, 1).await;

        let raw = auth.store().get("websocket:alice:9").await.unwrap().unwrap();
        let crumb: ChannelBreadcrumb = JsonCodec.decode(raw.as_bytes()).unwrap();
        assert_eq!(crumb.user_id, "alice");
        assert_eq!(crumb.websocket_count, 1);

        auth.clear_channel("alice", 9).await;
        assert!(!auth.store().exists("websocket:alice:9").await.unwrap());
    }

    #[tokio::test]
    async fn test_try_sessions_skips_accounts_without_record() {
        let auth = authority();
        auth.create_session("alice").await.unwrap();
        auth.store().sadd(ACTIVE_SESSIONS_KEY, "ghost").await.unwrap();

        let sessions = auth.try_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].username, "alice");
    }
}
