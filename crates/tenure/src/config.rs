//! Channel handler configuration.

use std::time::Duration;

/// Timing for each real-time channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// A channel that sends nothing (no message, `ping`, or `heartbeat`)
    /// for this long is closed with the timeout code.
    ///
    /// Default: 5 minutes.
    pub liveness_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(300),
        }
    }
}
