//! The shared session store collaborator.
//!
//! The session authority needs only a handful of key-value operations:
//! strings with per-key expiry, and sets with atomic add/remove. That is
//! the subset of Redis the [`SessionStore`] trait names. [`MemoryStore`]
//! implements it in-process for single-node deployments and tests;
//! `RedisStore` (feature `redis`) implements it against a real server
//! shared by every instance.
//!
//! No operation spans more than one key. Callers that write several keys
//! in sequence must tolerate a partial write.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::StoreError;

/// Key-value store with per-key TTL and set membership.
///
/// All methods take `&self`; implementations are shared across every
/// request and channel task and must do their own synchronization.
pub trait SessionStore: Send + Sync + 'static {
    /// `GET key`. `None` if the key is absent or expired.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// `SET key value EX ttl`. Replaces any existing value and TTL.
    fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// `SET key value EX ttl XX`. Rewrites the key only if it already
    /// exists; returns `false` and writes nothing otherwise.
    fn set_ex_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `EXPIRE key ttl`. Returns `false` if the key doesn't exist.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `DEL key`. Returns `true` if a key was removed.
    fn delete(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `EXISTS key`.
    fn exists(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `SADD set member`. Returns `true` if the member was newly added.
    fn sadd(
        &self,
        set: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `SREM set member`. Returns `true` if the member was present.
    fn srem(
        &self,
        set: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `SMEMBERS set`. Empty if the set doesn't exist.
    fn smembers(
        &self,
        set: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// `PING`. Succeeds iff the store is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`SessionStore`].
///
/// Expiry is measured on Tokio's clock, so tests can drive TTLs with
/// `tokio::time::pause()` and `advance()`. Expired keys are dropped
/// lazily when touched.
///
/// Two switches simulate an unhealthy backend:
/// [`set_available(false)`](Self::set_available) fails every operation,
/// [`set_read_only(true)`](Self::set_read_only) fails only writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    read_only: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty, healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail while reads keep working.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of live keys. Expired keys are not counted.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// `true` when no live keys remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check_read()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is read-only".into()));
        }
        Ok(())
    }
}

/// Returns the live entry at `key`, evicting it first if it has expired.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_read()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_ex_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(entry) => {
                entry.value = Value::Str(value.to_string());
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        let was_live = live_entry(&mut entries, key).is_some();
        entries.remove(key);
        Ok(was_live)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_read()?;
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key).is_some())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, set).is_none() {
            entries.insert(
                set.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(set) {
            Some(Entry { value: Value::Set(members), .. }) => {
                Ok(members.insert(member.to_string()))
            }
            _ => Err(StoreError::WrongType(set.to_string())),
        }
    }

    async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        let (removed, now_empty) = match live_entry(&mut entries, set) {
            None => return Ok(false),
            Some(Entry { value: Value::Set(members), .. }) => {
                (members.remove(member), members.is_empty())
            }
            Some(_) => return Err(StoreError::WrongType(set.to_string())),
        };
        // Redis deletes a set once its last member goes.
        if now_empty {
            entries.remove(set);
        }
        Ok(removed)
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        self.check_read()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, set) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Set(members), .. }) => {
                Ok(members.iter().cloned().collect())
            }
            Some(_) => Err(StoreError::WrongType(set.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_ex_then_get_returns_value() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", TTL).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_returns_none() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_lifetime() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.expire("k", TTL).await.unwrap());
        tokio::time::advance(Duration::from_secs(50)).await;

        assert!(store.exists("k").await.unwrap(), "refreshed key survives");
    }

    #[tokio::test]
    async fn test_set_ex_if_exists_missing_key_writes_nothing() {
        let store = MemoryStore::new();
        assert!(!store.set_ex_if_exists("k", "v", TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ex_if_exists_replaces_value_and_ttl() {
        let store = MemoryStore::new();
        store.set_ex("k", "old", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.set_ex_if_exists("k", "new", TTL).await.unwrap());
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_expire_missing_key_returns_false() {
        let store = MemoryStore::new();
        assert!(!store.expire("nope", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_reports_whether_key_existed() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", TTL).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_membership_add_remove() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "a").await.unwrap());
        assert!(!store.sadd("s", "a").await.unwrap(), "already a member");
        store.sadd("s", "b").await.unwrap();

        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        assert!(store.srem("s", "a").await.unwrap());
        assert!(!store.srem("s", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_srem_last_member_deletes_set() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.srem("s", "a").await.unwrap();
        assert!(!store.exists("s").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_ops_on_string_key_return_wrong_type() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", TTL).await.unwrap();
        assert!(matches!(
            store.sadd("k", "a").await,
            Err(StoreError::WrongType(_))
        ));
        assert!(matches!(
            store.smembers("k").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.get("k").await.is_err());
        assert!(store.set_ex("k", "v", TTL).await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_read_only_store_serves_reads_and_rejects_writes() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", TTL).await.unwrap();
        store.set_read_only(true);

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").await.is_err());
        assert!(store.sadd("s", "a").await.is_err());
    }
}
