//! Background reaper for tenure.
//!
//! Sessions and channels normally end on their own: the store expires
//! session keys, and channel tasks close on timeout or disconnect. The
//! reaper catches what slips through. Every tick it
//!
//! 1. sweeps sessions whose keys drifted apart or outlived their TTL
//!    ([`SessionAuthority::try_sweep_expired`]),
//! 2. closes channels idle past the registry's `idle_threshold`
//!    ([`ConnectionRegistry::idle_sweep`]),
//! 3. closes channels whose session no longer exists, with
//!    [`CloseCode::SessionRevoked`].
//!
//! A failing step is logged and counted, and the next tick runs as usual.
//! Each tick runs in its own task, so even a panic inside a sweep only
//! costs that tick.
//!
//! # Integration
//!
//! ```ignore
//! let reaper = Reaper::new(authority, registry, ReaperConfig::default());
//! let handle = reaper.spawn();
//! // ...
//! handle.shutdown().await;
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tenure_protocol::{CloseCode, SessionId};
use tenure_registry::ConnectionRegistry;
use tenure_session::{SessionAuthority, SessionError, SessionStore};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Reaper timing.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between ticks. Default: 5 minutes.
    pub interval: Duration,
    /// Random delay (0–max) added before the first tick, so instances
    /// started together don't sweep the shared store in lockstep.
    pub initial_jitter: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            initial_jitter: Duration::from_secs(2),
        }
    }
}

impl ReaperConfig {
    /// Replaces values the reaper can't run with by their defaults.
    ///
    /// Called automatically by [`Reaper::new`]. A zero `interval` would
    /// spin.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.interval.is_zero() {
            warn!(default = ?defaults.interval, "reaper interval is zero, using default");
            self.interval = defaults.interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters accumulated since the reaper started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaperMetrics {
    /// Ticks that ran to completion or failure.
    pub ticks: u64,
    /// Accounts cleaned up by the session sweep.
    pub sessions_swept: u64,
    /// Channels closed for idleness.
    pub idle_channels_closed: u64,
    /// Channels closed because their session was gone.
    pub orphan_channels_closed: u64,
    /// Steps that failed (store errors, panicked ticks).
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    sessions_swept: AtomicU64,
    idle_channels_closed: AtomicU64,
    orphan_channels_closed: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReaperMetrics {
        ReaperMetrics {
            ticks: self.ticks.load(Ordering::Relaxed),
            sessions_swept: self.sessions_swept.load(Ordering::Relaxed),
            idle_channels_closed: self.idle_channels_closed.load(Ordering::Relaxed),
            orphan_channels_closed: self.orphan_channels_closed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sessions_swept: usize,
    pub idle_channels_closed: usize,
    pub orphan_channels_closed: usize,
    /// Steps that failed during this tick.
    pub failures: usize,
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

/// Periodic maintenance over one authority and one registry.
pub struct Reaper<S: SessionStore> {
    authority: Arc<SessionAuthority<S>>,
    registry: Arc<ConnectionRegistry>,
    config: ReaperConfig,
    counters: Counters,
}

impl<S: SessionStore> Reaper<S> {
    pub fn new(
        authority: Arc<SessionAuthority<S>>,
        registry: Arc<ConnectionRegistry>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            authority,
            registry,
            config: config.validated(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> ReaperMetrics {
        self.counters.snapshot()
    }

    /// Runs one tick inline.
    pub async fn run_once(&self) -> TickReport {
        let mut report = TickReport::default();

        match self.authority.try_sweep_expired().await {
            Ok(swept) => report.sessions_swept = swept,
            Err(e) => {
                warn!(error = %e, "reaper: session sweep failed");
                report.failures += 1;
            }
        }

        let idle_threshold = self.registry.config().idle_threshold;
        report.idle_channels_closed = self.registry.idle_sweep(idle_threshold).await;

        match self.close_orphans().await {
            Ok(closed) => report.orphan_channels_closed = closed,
            Err(e) => {
                warn!(error = %e, "reaper: orphan channel check failed");
                report.failures += 1;
            }
        }

        let c = &self.counters;
        c.ticks.fetch_add(1, Ordering::Relaxed);
        c.sessions_swept.fetch_add(report.sessions_swept as u64, Ordering::Relaxed);
        c.idle_channels_closed
            .fetch_add(report.idle_channels_closed as u64, Ordering::Relaxed);
        c.orphan_channels_closed
            .fetch_add(report.orphan_channels_closed as u64, Ordering::Relaxed);
        c.failures.fetch_add(report.failures as u64, Ordering::Relaxed);

        debug!(?report, "reaper tick finished");
        report
    }

    /// Closes channels admitted under a session that no longer resolves.
    /// Stops at the first store failure; a store outage must not look
    /// like every session vanished.
    async fn close_orphans(&self) -> Result<usize, SessionError> {
        let bound: BTreeSet<(String, SessionId)> = self
            .registry
            .bindings()
            .await
            .into_iter()
            .map(|b| (b.account, b.session_id))
            .collect();

        let mut closed = 0;
        for (account, session_id) in bound {
            match self.authority.try_get_session(&session_id).await {
                Ok(_) => {}
                Err(SessionError::NotFound(_)) => {
                    let n = self
                        .registry
                        .evict_session(&account, &session_id, CloseCode::SessionRevoked)
                        .await;
                    if n > 0 {
                        info!(%account, %session_id, closed = n, "closed channels of vanished session");
                    }
                    closed += n;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    /// Starts the tick loop on the Tokio runtime.
    pub fn spawn(self) -> ReaperHandle<S> {
        let reaper = Arc::new(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let jitter = if reaper.config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = reaper.config.initial_jitter.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=max))
        };
        let interval = reaper.config.interval;

        let looped = Arc::clone(&reaper);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval + jitter, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(?interval, ?jitter, "reaper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let tick = Arc::clone(&looped);
                        let outcome = tokio::spawn(async move { tick.run_once().await }).await;
                        if let Err(e) = outcome {
                            error!(error = %e, "reaper tick aborted");
                            looped.counters.ticks.fetch_add(1, Ordering::Relaxed);
                            looped.counters.failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            info!("reaper stopped");
        });

        ReaperHandle {
            reaper,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Controls a running reaper.
pub struct ReaperHandle<S: SessionStore> {
    reaper: Arc<Reaper<S>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl<S: SessionStore> ReaperHandle<S> {
    pub fn metrics(&self) -> ReaperMetrics {
        self.reaper.metrics()
    }

    /// Stops the loop after the current tick, if any, and waits for it.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "reaper task ended abnormally");
        }
    }
}

impl<S: SessionStore> Drop for ReaperHandle<S> {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
