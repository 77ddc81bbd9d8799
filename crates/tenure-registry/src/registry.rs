//! The connection registry: live channels per account on this process.
//!
//! The registry never touches sockets. Each admitted channel hands over
//! the sending half of its outbound queue, and everything the registry
//! does to a channel (notify it, close it) is a message on that queue.
//! The channel's own task performs the I/O and removes itself on exit.
//!
//! All state sits behind one async mutex, so admit, remove, and evict for
//! an account never interleave. Close acknowledgements are awaited after
//! the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use futures_util::future::join_all;
use tenure_protocol::{CloseCode, Notice, SessionId};
use tenure_transport::ConnectionId;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::channel::ChannelEntry;
use crate::{ChannelBinding, ChannelSender, Outbound, RegistryConfig};

type AccountChannels = HashMap<ConnectionId, ChannelEntry>;

/// A channel taken out of the registry, waiting to be closed.
type Evicted = (String, ConnectionId, ChannelEntry);

struct Inner {
    accounts: HashMap<String, AccountChannels>,
    last_sweep: Instant,
}

/// Live channels grouped by account.
///
/// Construct one per server and share it through an `Arc`.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                accounts: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers a channel for `account`, bound to `session_id`.
    ///
    /// Returns `false` without registering anything if the account
    /// already holds `max_channels_per_account` channels. The caller
    /// must then close the channel itself.
    ///
    /// An admission also runs an idle sweep if the last one was more than
    /// `opportunistic_sweep_interval` ago.
    pub async fn admit(
        &self,
        account: &str,
        conn_id: ConnectionId,
        session_id: SessionId,
        sender: ChannelSender,
    ) -> bool {
        let mut inner = self.inner.lock().await;

        let held = inner.accounts.get(account).map_or(0, HashMap::len);
        if held >= self.config.max_channels_per_account {
            tracing::warn!(
                %account,
                %conn_id,
                held,
                cap = self.config.max_channels_per_account,
                "channel rejected: connection limit"
            );
            return false;
        }

        inner
            .accounts
            .entry(account.to_string())
            .or_default()
            .insert(conn_id, ChannelEntry::new(session_id, sender));
        tracing::info!(%account, %conn_id, channels = held + 1, "channel admitted");

        let now = Instant::now();
        let idle = if now.duration_since(inner.last_sweep)
            >= self.config.opportunistic_sweep_interval
        {
            inner.last_sweep = now;
            take_idle(&mut inner.accounts, now, self.config.idle_threshold)
        } else {
            Vec::new()
        };
        drop(inner);

        // Don't hold the admitting client up on other clients' acks.
        for (account, conn_id, entry) in idle {
            if entry.close(CloseCode::Timeout).is_some() {
                tracing::info!(%account, %conn_id, "idle channel closed on admission sweep");
            }
        }
        true
    }

    /// Unregisters a channel. Returns `false` if it wasn't registered
    /// (e.g. already evicted). Drops the account's entry when its last
    /// channel goes.
    pub async fn remove(&self, account: &str, conn_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = remove_channel(&mut inner.accounts, account, conn_id).is_some();
        if removed {
            tracing::debug!(%account, %conn_id, "channel removed");
        }
        removed
    }

    /// Records inbound traffic on one channel. Other channels of the same
    /// account are unaffected.
    pub async fn touch(&self, account: &str, conn_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner
            .accounts
            .get_mut(account)
            .and_then(|channels| channels.get_mut(&conn_id))
        {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Queues `notice` on every channel of `account`. Returns how many
    /// accepted it.
    ///
    /// A channel whose task has gone away doesn't stop delivery to the
    /// others; it is unregistered once the loop is done.
    pub async fn broadcast(&self, account: &str, notice: &Notice) -> usize {
        let mut inner = self.inner.lock().await;
        let Some(channels) = inner.accounts.get(account) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (conn_id, entry) in channels {
            match entry.sender.send(Outbound::Notice(notice.clone())) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(*conn_id),
            }
        }
        for conn_id in dead {
            remove_channel(&mut inner.accounts, account, conn_id);
            tracing::debug!(%account, %conn_id, "dropped dead channel during broadcast");
        }

        tracing::debug!(%account, kind = ?notice.kind, delivered, "broadcast");
        delivered
    }

    /// Closes every channel of `account` as a forced logout and forgets
    /// them. Returns how many close instructions were delivered.
    ///
    /// The account's entry is gone when this returns, whatever happened to
    /// the individual closes. Waits up to `close_grace` for the channels to
    /// report their close frames sent.
    pub async fn force_evict_all(&self, account: &str) -> usize {
        let channels = self.inner.lock().await.accounts.remove(account);
        let Some(channels) = channels else {
            return 0;
        };
        let evicted = channels
            .into_iter()
            .map(|(conn_id, entry)| (account.to_string(), conn_id, entry))
            .collect();
        let closed = self.close_all(evicted, CloseCode::ForcedLogout).await;
        tracing::info!(%account, closed, "force-evicted channels");
        closed
    }

    /// Closes the channels of `account` that were admitted under
    /// `session_id`. Returns how many were closed.
    pub async fn evict_session(
        &self,
        account: &str,
        session_id: &SessionId,
        code: CloseCode,
    ) -> usize {
        let evicted = {
            let mut inner = self.inner.lock().await;
            let Some(channels) = inner.accounts.get_mut(account) else {
                return 0;
            };
            let bound: Vec<ConnectionId> = channels
                .iter()
                .filter(|(_, entry)| &entry.session_id == session_id)
                .map(|(conn_id, _)| *conn_id)
                .collect();
            let mut evicted = Vec::with_capacity(bound.len());
            for conn_id in bound {
                if let Some(entry) = remove_channel(&mut inner.accounts, account, conn_id) {
                    evicted.push((account.to_string(), conn_id, entry));
                }
            }
            evicted
        };
        self.close_all(evicted, code).await
    }

    /// Closes every channel, on any account, with no inbound traffic for
    /// longer than `threshold`. Returns how many were closed.
    pub async fn idle_sweep(&self, threshold: Duration) -> usize {
        let idle = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            inner.last_sweep = now;
            take_idle(&mut inner.accounts, now, threshold)
        };
        if idle.is_empty() {
            return 0;
        }
        let closed = self.close_all(idle, CloseCode::Timeout).await;
        tracing::info!(closed, "idle sweep closed channels");
        closed
    }

    /// Channels currently held by `account`.
    pub async fn channel_count(&self, account: &str) -> usize {
        self.inner
            .lock()
            .await
            .accounts
            .get(account)
            .map_or(0, HashMap::len)
    }

    /// Channels across all accounts.
    pub async fn total_channels(&self) -> usize {
        self.inner.lock().await.accounts.values().map(HashMap::len).sum()
    }

    /// Channel count per account, for accounts holding at least one.
    pub async fn channel_counts(&self) -> BTreeMap<String, usize> {
        self.inner
            .lock()
            .await
            .accounts
            .iter()
            .map(|(account, channels)| (account.clone(), channels.len()))
            .collect()
    }

    /// Every registered channel and the session it was admitted under.
    pub async fn bindings(&self) -> Vec<ChannelBinding> {
        let inner = self.inner.lock().await;
        let mut bindings: Vec<ChannelBinding> = inner
            .accounts
            .iter()
            .flat_map(|(account, channels)| {
                channels.iter().map(|(conn_id, entry)| ChannelBinding {
                    account: account.clone(),
                    conn_id: *conn_id,
                    session_id: entry.session_id.clone(),
                })
            })
            .collect();
        bindings.sort_by(|a, b| a.account.cmp(&b.account).then(a.conn_id.cmp(&b.conn_id)));
        bindings
    }

    /// Sends `code` to each evicted channel and waits, bounded by
    /// `close_grace`, for the acks. Failures are logged, not retried.
    async fn close_all(&self, evicted: Vec<Evicted>, code: CloseCode) -> usize {
        let mut acks = Vec::with_capacity(evicted.len());
        for (account, conn_id, entry) in evicted {
            match entry.close(code) {
                Some(ack) => acks.push(ack),
                None => {
                    tracing::warn!(%account, %conn_id, %code, "close failed: channel task already gone");
                }
            }
        }
        let closed = acks.len();
        if closed > 0
            && tokio::time::timeout(self.config.close_grace, join_all(acks))
                .await
                .is_err()
        {
            tracing::warn!(%code, grace = ?self.config.close_grace, "channels slow to confirm close");
        }
        closed
    }
}

/// Removes one channel, and its account's entry if that empties it.
fn remove_channel(
    accounts: &mut HashMap<String, AccountChannels>,
    account: &str,
    conn_id: ConnectionId,
) -> Option<ChannelEntry> {
    let channels = accounts.get_mut(account)?;
    let entry = channels.remove(&conn_id);
    if channels.is_empty() {
        accounts.remove(account);
    }
    entry
}

/// Removes and returns every channel idle for longer than `threshold`.
fn take_idle(
    accounts: &mut HashMap<String, AccountChannels>,
    now: Instant,
    threshold: Duration,
) -> Vec<Evicted> {
    let mut idle = Vec::new();
    accounts.retain(|account, channels| {
        let stale: Vec<ConnectionId> = channels
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) > threshold)
            .map(|(conn_id, _)| *conn_id)
            .collect();
        for conn_id in stale {
            if let Some(entry) = channels.remove(&conn_id) {
                idle.push((account.clone(), conn_id, entry));
            }
        }
        !channels.is_empty()
    });
    idle
}
