//! Connection registry for tenure.
//!
//! Tracks which live channels belong to which account on this process,
//! and is the only way anything outside a channel's own task talks to it.
//!
//! # Key types
//!
//! - [`ConnectionRegistry`]: admit/remove channels, enforce the
//!   per-account cap, broadcast notices, force-close channels
//! - [`Outbound`]: what the registry hands to a channel task
//! - [`RegistryConfig`]: cap, idle threshold, sweep cadence

mod channel;
mod config;
mod registry;

pub use channel::{ChannelBinding, ChannelSender, Outbound};
pub use config::RegistryConfig;
pub use registry::ConnectionRegistry;
