//! Per-channel registry state and the messages a channel task receives.

use tenure_protocol::{CloseCode, Notice, SessionId};
use tenure_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// An instruction for a channel task, delivered in order.
///
/// Notices and closes share one queue, so a notice sent before a close
/// is always written to the socket first.
#[derive(Debug)]
pub enum Outbound {
    /// Write this notice to the client.
    Notice(Notice),
    /// Close the socket with `code`, then signal `ack`.
    Close {
        code: CloseCode,
        ack: oneshot::Sender<()>,
    },
}

/// Sending half of a channel task's outbound queue.
pub type ChannelSender = mpsc::UnboundedSender<Outbound>;

/// A registered channel as seen from outside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub account: String,
    pub conn_id: ConnectionId,
    /// The session the channel was admitted under.
    pub session_id: SessionId,
}

#[derive(Debug)]
pub(crate) struct ChannelEntry {
    pub(crate) session_id: SessionId,
    pub(crate) sender: ChannelSender,
    pub(crate) last_activity: Instant,
}

impl ChannelEntry {
    pub(crate) fn new(session_id: SessionId, sender: ChannelSender) -> Self {
        Self {
            session_id,
            sender,
            last_activity: Instant::now(),
        }
    }

    /// Queues a close. Returns the ack receiver, or `None` if the channel
    /// task is already gone.
    pub(crate) fn close(&self, code: CloseCode) -> Option<oneshot::Receiver<()>> {
        let (ack, rx) = oneshot::channel();
        self.sender.send(Outbound::Close { code, ack }).ok().map(|_| rx)
    }
}
