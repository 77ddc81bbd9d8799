//! Boots a tenure server and walks one account through a takeover:
//! a first device opens a channel, a second login evicts it, and the
//! first device's old token stops working.
//!
//! ```text
//! RUST_LOG=debug cargo run -p takeover
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tenure::prelude::*;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Error = Box<dyn std::error::Error + Send + Sync>;

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind = std::env::var("TENURE_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let secret = std::env::var("TENURE_JWT_SECRET").unwrap_or_else(|_| {
        warn!("TENURE_JWT_SECRET not set, signing tokens with a development secret");
        "development-only-secret".to_string()
    });
    let issuer = JwtIssuer::new(secret.as_bytes(), Duration::from_secs(3600));

    #[cfg(feature = "redis")]
    if let Ok(url) = std::env::var("TENURE_REDIS_URL") {
        info!(%url, "using Redis session store");
        let store = RedisStore::connect(&url).await?;
        return run(&bind, store, issuer).await;
    }

    info!("using in-memory session store");
    run(&bind, MemoryStore::new(), issuer).await
}

async fn run<S: SessionStore>(bind: &str, store: S, issuer: JwtIssuer) -> Result<(), Error> {
    let users = StaticDirectory::new()
        .with_user("alice", "Alice Liddell", "wonderland", false)
        .with_user("admin", "Administrator", "admin123", true);

    let server = TenureServer::<S, StaticDirectory, JwtIssuer>::builder()
        .bind(bind)
        .build(store, users, issuer)
        .await?;
    let addr = server.local_addr()?;
    let gateway = server.gateway();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    // First device signs in and opens its channel.
    let first = gateway.login("alice", "wonderland").await?;
    info!(session_id = %first.session_id, "first device signed in");
    let mut laptop = open_channel(addr, "alice", &first.access_token).await?;
    laptop.send(Message::Text("heartbeat".into())).await?;
    info!(reply = %next_text(&mut laptop).await?, "first device heartbeat");

    // Second device signs in; the first one is told and closed.
    let second = gateway.login("alice", "wonderland").await?;
    info!(session_id = %second.session_id, "second device signed in");
    while let Some(msg) = laptop.next().await {
        match msg? {
            Message::Text(text) => info!(notice = %text, "first device received notice"),
            Message::Close(frame) => {
                info!(code = ?frame.map(|f| u16::from(f.code)), "first device closed");
                break;
            }
            _ => {}
        }
    }

    // The first device's token no longer opens a channel.
    let mut stale = connect(addr, "alice", &first.access_token).await?;
    if let Some(Ok(Message::Close(frame))) = stale.next().await {
        info!(code = ?frame.map(|f| u16::from(f.code)), "stale token rejected");
    }

    let mut phone = open_channel(addr, "alice", &second.access_token).await?;
    phone.send(Message::Text("ping".into())).await?;
    info!(reply = %next_text(&mut phone).await?, "second device ping");

    println!("{}", serde_json::to_string_pretty(&gateway.active_sessions().await?)?);
    println!("{}", serde_json::to_string_pretty(&gateway.health().await)?);

    let out = gateway.logout("alice").await?;
    info!(removed = out.removed, channels_closed = out.channels_closed, "signed out");

    let _ = stop_tx.send(());
    running.await??;
    Ok(())
}

async fn connect(addr: SocketAddr, account: &str, token: &str) -> Result<ClientWs, Error> {
    let url = format!("ws://{addr}/ws/{account}?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws)
}

/// Connects and consumes the `connection_established` notice.
async fn open_channel(addr: SocketAddr, account: &str, token: &str) -> Result<ClientWs, Error> {
    let mut ws = connect(addr, account, token).await?;
    let established = next_text(&mut ws).await?;
    info!(%account, notice = %established, "channel open");
    Ok(ws)
}

async fn next_text(ws: &mut ClientWs) -> Result<String, Error> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Close(frame))) => {
                return Err(format!("channel closed: {frame:?}").into());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err("channel ended".into()),
        }
    }
}
