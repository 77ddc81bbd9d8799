//! Registry configuration.

use std::time::Duration;

/// Limits and timings for the [`ConnectionRegistry`](crate::ConnectionRegistry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Most channels one account may hold at once. The next admission
    /// is rejected.
    ///
    /// Default: 3.
    pub max_channels_per_account: usize,

    /// A channel with no inbound traffic for this long is closed by an
    /// idle sweep.
    ///
    /// Default: 10 minutes.
    pub idle_threshold: Duration,

    /// Admissions run an idle sweep at most this often.
    ///
    /// Default: 5 minutes.
    pub opportunistic_sweep_interval: Duration,

    /// How long a force-close waits for channels to confirm their close
    /// frame went out.
    ///
    /// Default: 2 seconds.
    pub close_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_channels_per_account: 3,
            idle_threshold: Duration::from_secs(600),
            opportunistic_sweep_interval: Duration::from_secs(300),
            close_grace: Duration::from_secs(2),
        }
    }
}
