//! Shared store key layout.
//!
//! Every instance sharing a store must agree on these names; they are
//! also what operators see in `redis-cli`.

use tenure_protocol::SessionId;

/// Set of usernames currently believed to hold a session.
pub const ACTIVE_SESSIONS_KEY: &str = "active_sessions";

/// Short-lived cache of the active-sessions report.
pub const CACHED_ACTIVE_SESSIONS_KEY: &str = "cached_active_sessions";

/// Session record, keyed by session id.
pub fn session_key(session_id: &SessionId) -> String {
    format!("session:{session_id}")
}

/// Username → current session id pointer.
pub fn user_session_key(username: &str) -> String {
    format!("user_session:{username}")
}

/// Per-channel observability breadcrumb.
pub fn breadcrumb_key(username: &str, channel: u64) -> String {
    format!("websocket:{username}:{channel}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(session_key(&SessionId::from("s1")), "session:s1");
        assert_eq!(user_session_key("alice"), "user_session:alice");
        assert_eq!(breadcrumb_key("alice", 7), "websocket:alice:7");
    }
}
