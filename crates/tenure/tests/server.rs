//! End-to-end tests: a real server on a random port, real WebSocket
//! clients, and the gateway driving logins.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use tenure::prelude::*;
use tenure_session::TokenError;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

const SECRET: &[u8] = b"test-secret";

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type TestGateway = Arc<Gateway<MemoryStore, StaticDirectory, JwtIssuer>>;

fn users() -> StaticDirectory {
    StaticDirectory::new()
        .with_user("alice", "Alice", "wonderland", true)
        .with_user("bob", "Bob", "builder", false)
}

async fn start_server_with(channel: ChannelConfig) -> (String, TestGateway) {
    let server = TenureServer::<MemoryStore, StaticDirectory, JwtIssuer>::builder()
        .bind("127.0.0.1:0")
        .channel_config(channel)
        .build(
            MemoryStore::new(),
            users(),
            JwtIssuer::new(SECRET, Duration::from_secs(3600)),
        )
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let gateway = server.gateway();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, gateway)
}

async fn start_server() -> (String, TestGateway) {
    start_server_with(ChannelConfig::default()).await
}

async fn connect_path(addr: &str, path: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("should connect");
    ws
}

/// Opens a channel and waits for `connection_established`.
async fn open_channel(addr: &str, account: &str, token: &str) -> ClientWs {
    let mut ws = connect_path(addr, &format!("/ws/{account}?token={token}")).await;
    let notice = next_notice(&mut ws).await;
    assert_eq!(notice["type"], "connection_established");
    ws
}

async fn next_message(ws: &mut ClientWs) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("server should answer within 5s")
        .expect("stream ended")
        .expect("recv failed")
}

async fn next_text(ws: &mut ClientWs) -> String {
    match next_message(ws).await {
        Message::Text(text) => text.to_string(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn next_notice(ws: &mut ClientWs) -> serde_json::Value {
    serde_json::from_str(&next_text(ws).await).expect("notice should be JSON")
}

/// Waits for the close frame and returns its code and reason.
async fn expect_close(ws: &mut ClientWs) -> (u16, String) {
    match next_message(ws).await {
        Message::Close(Some(frame)) => (u16::from(frame.code), frame.reason.to_string()),
        other => panic!("expected close frame, got {other:?}"),
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_channel_established_with_valid_token() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();

    let _ws = open_channel(&addr, "alice", &login.access_token).await;

    assert_eq!(gateway.registry().channel_count("alice").await, 1);
}

#[tokio::test]
async fn test_channel_without_token_closes_4001() {
    let (addr, _gateway) = start_server().await;
    let mut ws = connect_path(&addr, "/ws/alice").await;

    assert_eq!(expect_close(&mut ws).await, (4001, "Token missing".into()));
}

#[tokio::test]
async fn test_channel_token_for_other_account_closes_4002() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();

    let mut ws = connect_path(&addr, &format!("/ws/bob?token={}", login.access_token)).await;

    assert_eq!(expect_close(&mut ws).await.0, 4002);
    assert_eq!(gateway.registry().total_channels().await, 0);
}

#[tokio::test]
async fn test_channel_forged_token_closes_4003() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let forger = JwtIssuer::new(b"not-the-secret", Duration::from_secs(3600));
    let forged = forger
        .issue(&forger.claims_for("alice", &login.session_id))
        .unwrap();

    let mut ws = connect_path(&addr, &format!("/ws/alice?token={forged}")).await;
    assert_eq!(expect_close(&mut ws).await.0, 4003);

    let mut ws = connect_path(&addr, "/ws/alice?token=garbage").await;
    assert_eq!(expect_close(&mut ws).await.0, 4003);
}

#[tokio::test]
async fn test_channel_expired_token_closes_4005() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let expired = gateway
        .issuer()
        .issue(&Claims {
            sub: "alice".into(),
            session_id: login.session_id,
            exp: chrono::Utc::now().timestamp() - 60,
        })
        .unwrap();

    let mut ws = connect_path(&addr, &format!("/ws/alice?token={expired}")).await;

    assert_eq!(expect_close(&mut ws).await, (4005, "Token expired".into()));
}

#[tokio::test]
async fn test_channel_beyond_cap_closes_4004() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();

    let mut open = Vec::new();
    for _ in 0..3 {
        open.push(open_channel(&addr, "alice", &login.access_token).await);
    }
    let mut fourth =
        connect_path(&addr, &format!("/ws/alice?token={}", login.access_token)).await;

    assert_eq!(expect_close(&mut fourth).await.0, 4004);
    assert_eq!(gateway.registry().channel_count("alice").await, 3);
}

#[tokio::test]
async fn test_channel_with_superseded_token_closes_4006() {
    let (addr, gateway) = start_server().await;
    let first = gateway.login("alice", "wonderland").await.unwrap();
    gateway.login("alice", "wonderland").await.unwrap();

    let mut ws = connect_path(&addr, &format!("/ws/alice?token={}", first.access_token)).await;

    assert_eq!(expect_close(&mut ws).await, (4006, "Session revoked".into()));
    assert_eq!(gateway.registry().total_channels().await, 0);
}

#[tokio::test]
async fn test_channel_on_foreign_path_closes_1008() {
    let (addr, _gateway) = start_server().await;
    let mut ws = connect_path(&addr, "/api/alice?token=x").await;

    assert_eq!(expect_close(&mut ws).await.0, 1008);
}

// =========================================================================
// Liveness
// =========================================================================

#[tokio::test]
async fn test_ping_and_heartbeat_are_answered() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let mut ws = open_channel(&addr, "alice", &login.access_token).await;

    ws.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "pong");

    ws.send(Message::Text("heartbeat".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "heartbeat_ack");

    // Anything else is accepted silently.
    ws.send(Message::Text("hello".into())).await.unwrap();
    ws.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "pong");
}

#[tokio::test]
async fn test_heartbeat_after_session_removed_closes_4006() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let mut ws = open_channel(&addr, "alice", &login.access_token).await;

    // Session gone behind the channel's back (e.g. TTL expiry).
    gateway.authority().remove_session("alice").await;

    ws.send(Message::Text("heartbeat".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "heartbeat_ack");
    assert_eq!(expect_close(&mut ws).await.0, 4006);
}

#[tokio::test]
async fn test_silent_channel_times_out() {
    let (addr, gateway) = start_server_with(ChannelConfig {
        liveness_timeout: Duration::from_millis(200),
    })
    .await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let mut ws = open_channel(&addr, "alice", &login.access_token).await;

    assert_eq!(expect_close(&mut ws).await, (1000, "Timeout".into()));
}

#[tokio::test]
async fn test_client_disconnect_unregisters_channel() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let mut ws = open_channel(&addr, "alice", &login.access_token).await;
    assert_eq!(gateway.registry().channel_count("alice").await, 1);

    ws.close(None).await.unwrap();

    let registry = Arc::clone(gateway.registry());
    let drained = tokio::time::timeout(Duration::from_secs(2), async move {
        while registry.channel_count("alice").await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "channel should be unregistered");
}

// =========================================================================
// Takeover
// =========================================================================

#[tokio::test]
async fn test_second_login_evicts_first_channel() {
    let (addr, gateway) = start_server().await;
    let first = gateway.login("alice", "wonderland").await.unwrap();
    let mut old = open_channel(&addr, "alice", &first.access_token).await;

    let second = gateway.login("alice", "wonderland").await.unwrap();

    let notice = next_notice(&mut old).await;
    assert_eq!(notice["type"], "force_logout");
    assert_eq!(expect_close(&mut old).await, (1000, "Force disconnect".into()));

    assert_ne!(first.session_id, second.session_id);
    assert!(matches!(
        gateway.authority().get_session(&first.session_id).await,
        Err(SessionError::NotFound(_))
    ));
    let current = gateway.authority().get_session(&second.session_id).await.unwrap();
    assert_eq!(current.username, "alice");
    assert!(gateway.authority().is_active("alice").await);
    assert_eq!(
        gateway.authority().try_current_session_id("alice").await.unwrap(),
        Some(second.session_id.clone())
    );

    // The new login's channel opens normally.
    let _new = open_channel(&addr, "alice", &second.access_token).await;
    assert_eq!(gateway.registry().channel_count("alice").await, 1);
}

#[tokio::test]
async fn test_takeover_leaves_other_accounts_alone() {
    let (addr, gateway) = start_server().await;
    let alice = gateway.login("alice", "wonderland").await.unwrap();
    let bob = gateway.login("bob", "builder").await.unwrap();
    let mut bob_ws = open_channel(&addr, "bob", &bob.access_token).await;
    let _alice_ws = open_channel(&addr, "alice", &alice.access_token).await;

    gateway.login("alice", "wonderland").await.unwrap();

    bob_ws.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_text(&mut bob_ws).await, "pong");
    assert!(gateway.authority().get_session(&bob.session_id).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_logins_leave_exactly_one_session() {
    let (_addr, gateway) = start_server().await;

    let logins = (0..8).map(|_| {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.login("alice", "wonderland").await })
    });
    let results: Vec<tenure::LoginResponse> = join_all(logins)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let mut live = 0;
    for r in &results {
        if gateway.authority().get_session(&r.session_id).await.is_ok() {
            live += 1;
        }
    }
    assert_eq!(live, 1);
    assert_eq!(gateway.authority().list_active().await.len(), 1);
}

#[tokio::test]
async fn test_login_with_store_down_fails_internal() {
    let (_addr, gateway) = start_server().await;
    gateway.authority().store().set_available(false);

    let err = gateway.login("alice", "wonderland").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    gateway.authority().store().set_available(true);
    assert!(!gateway.authority().is_active("alice").await);
}

#[tokio::test]
async fn test_login_wrong_password_is_unauthorized() {
    let (_addr, gateway) = start_server().await;

    let err = gateway.login("alice", "nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    let err = gateway.login("mallory", "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(!gateway.authority().is_active("alice").await);
}

/// Signs nothing; every issue fails.
struct BrokenIssuer;

impl TokenIssuer for BrokenIssuer {
    fn issue(&self, _claims: &Claims) -> Result<String, TokenError> {
        Err(TokenError::Issue("signing key unavailable".into()))
    }

    fn verify(&self, _token: &str) -> Result<Claims, TokenError> {
        Err(TokenError::InvalidSignature)
    }

    fn lifetime(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

#[tokio::test]
async fn test_login_token_issue_failure_leaves_no_session() {
    let server = TenureServer::<MemoryStore, StaticDirectory, BrokenIssuer>::builder()
        .bind("127.0.0.1:0")
        .build(MemoryStore::new(), users(), BrokenIssuer)
        .await
        .expect("server should build");
    let gateway = server.gateway();

    let err = gateway.login("alice", "wonderland").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(!gateway.authority().is_active("alice").await);
    assert!(gateway.authority().list_active().await.is_empty());
    assert!(gateway.authority().store().is_empty().await);
}

// =========================================================================
// Logout, listings, health
// =========================================================================

#[tokio::test]
async fn test_logout_closes_channels_and_ends_session() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let mut ws = open_channel(&addr, "alice", &login.access_token).await;

    let out = gateway.logout("alice").await.unwrap();

    assert!(out.removed);
    assert_eq!(out.channels_closed, 1);
    assert_eq!(expect_close(&mut ws).await.0, 1000);
    assert!(!gateway.authority().is_active("alice").await);

    let again = gateway.logout("alice").await.unwrap();
    assert!(!again.removed);
}

#[tokio::test]
async fn test_active_sessions_reports_channel_counts_and_caches() {
    let (addr, gateway) = start_server().await;
    let alice = gateway.login("alice", "wonderland").await.unwrap();
    gateway.login("bob", "builder").await.unwrap();
    let _ws = open_channel(&addr, "alice", &alice.access_token).await;

    let report = gateway.active_sessions().await.unwrap();
    assert_eq!(report.count, 2);
    let entry = report
        .sessions
        .iter()
        .find(|s| s.username == "alice")
        .unwrap();
    assert_eq!(entry.session_id, alice.session_id);
    assert_eq!(entry.websocket_count, 1);

    // Served from the cache until it expires.
    gateway.logout("bob").await.unwrap();
    let cached = gateway.active_sessions().await.unwrap();
    assert_eq!(cached.count, 2);
    assert_eq!(cached.timestamp, report.timestamp);
}

#[tokio::test]
async fn test_active_sessions_with_store_down_is_internal() {
    let (_addr, gateway) = start_server().await;
    gateway.authority().store().set_available(false);

    let err = gateway.active_sessions().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn test_users_marks_signed_in_accounts() {
    let (_addr, gateway) = start_server().await;
    gateway.login("bob", "builder").await.unwrap();

    let users = gateway.users().await;

    let flags: Vec<(&str, bool)> = users
        .iter()
        .map(|u| (u.username.as_str(), u.is_active))
        .collect();
    assert_eq!(flags, vec![("alice", false), ("bob", true)]);
}

#[tokio::test]
async fn test_health_reports_store_and_load() {
    let (addr, gateway) = start_server().await;
    let login = gateway.login("alice", "wonderland").await.unwrap();
    let _ws = open_channel(&addr, "alice", &login.access_token).await;

    let health = gateway.health().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.store, tenure::StoreStatus::Connected);
    assert_eq!(health.active_connections, 1);
    assert_eq!(health.active_sessions, 1);

    gateway.authority().store().set_available(false);
    let health = gateway.health().await;
    assert_eq!(health.status, "degraded");
    assert_eq!(health.store, tenure::StoreStatus::Disconnected);
    assert!(health.store_failures >= 1);
}
