//! Per-channel handler: handshake, admission, and the liveness loop.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Parse `/ws/{account}?token=...` and verify the token
//!   2. Under the account lock: confirm the token's session still exists,
//!      then admit the channel to the registry
//!   3. Send `connection_established`
//!   4. Loop: answer `ping`/`heartbeat`, relay registry notices and
//!      closes, close on silence
//!
//! A rejected handshake closes the socket with the matching close code
//! and never touches the registry.

use std::sync::Arc;

use tenure_protocol::{
    ChannelRequest, ClientSignal, CloseCode, Codec, Notice, SessionId, HEARTBEAT_ACK, PONG,
};
use tenure_registry::{ConnectionRegistry, Outbound};
use tenure_session::{
    Authenticator, SessionAuthority, SessionError, SessionStore, TokenError, TokenIssuer,
};
use tenure_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::Gateway;

/// Unregisters a channel when its handler exits.
///
/// The normal path calls [`release`](Self::release). If the handler
/// unwinds or its task is aborted instead, `Drop` spawns the same cleanup,
/// since the async lock can't be taken synchronously.
struct ChannelGuard<S: SessionStore> {
    account: String,
    conn_id: ConnectionId,
    authority: Arc<SessionAuthority<S>>,
    registry: Arc<ConnectionRegistry>,
    released: bool,
}

impl<S: SessionStore> ChannelGuard<S> {
    async fn release(mut self) {
        self.released = true;
        cleanup(
            &self.registry,
            &self.authority,
            &self.account,
            self.conn_id,
        )
        .await;
    }
}

impl<S: SessionStore> Drop for ChannelGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let account = std::mem::take(&mut self.account);
        let conn_id = self.conn_id;
        let registry = Arc::clone(&self.registry);
        let authority = Arc::clone(&self.authority);
        runtime.spawn(async move {
            cleanup(&registry, &authority, &account, conn_id).await;
        });
    }
}

async fn cleanup<S: SessionStore>(
    registry: &ConnectionRegistry,
    authority: &SessionAuthority<S>,
    account: &str,
    conn_id: ConnectionId,
) {
    registry.remove(account, conn_id).await;
    authority.clear_channel(account, conn_id.into_inner()).await;
}

/// A channel that passed the token checks.
struct Verified {
    account: String,
    session_id: SessionId,
}

/// Handles a single channel from accept to close.
pub(crate) async fn handle_channel<C, S, A, T>(conn: C, gateway: Arc<Gateway<S, A, T>>)
where
    C: Connection,
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, path = conn.request_path(), "handling new channel");

    // --- Step 1: token checks ---
    let verified = match verify(&conn, &gateway) {
        Ok(v) => v,
        Err(code) => {
            tracing::info!(%conn_id, %code, "channel rejected");
            close(&conn, code).await;
            return;
        }
    };
    let Verified {
        account,
        session_id,
    } = verified;

    // --- Step 2: admission ---
    let (tx, mut rx) = mpsc::unbounded_channel();
    let admitted = {
        let _lock = gateway.authority.lock_account(&account).await;
        let check = match gateway.authority.try_get_session(&session_id).await {
            Ok(session) if session.username == account => Ok(()),
            Ok(_) | Err(SessionError::NotFound(_)) => Err(CloseCode::SessionRevoked),
            Err(e) => {
                // Without the store a live session can't be told from a
                // revoked one. Let the channel in rather than lock every
                // account out.
                tracing::warn!(%account, %conn_id, error = %e, "session check unavailable; admitting");
                Ok(())
            }
        };
        match check {
            Ok(()) => {
                if gateway
                    .registry
                    .admit(&account, conn_id, session_id.clone(), tx)
                    .await
                {
                    Ok(())
                } else {
                    Err(CloseCode::ConnectionLimitExceeded)
                }
            }
            Err(code) => Err(code),
        }
    };
    if let Err(code) = admitted {
        tracing::info!(%account, %conn_id, %code, "channel rejected");
        close(&conn, code).await;
        return;
    }

    let guard = ChannelGuard {
        account: account.clone(),
        conn_id,
        authority: Arc::clone(&gateway.authority),
        registry: Arc::clone(&gateway.registry),
        released: false,
    };
    let held = gateway.registry.channel_count(&account).await;
    gateway
        .authority
        .record_channel(&account, conn_id.into_inner(), held)
        .await;

    // --- Step 3: established ---
    if send_notice(&conn, &gateway, &Notice::connection_established()).await {
        tracing::info!(%account, %conn_id, %session_id, "channel established");

        // --- Step 4: liveness loop ---
        run_channel(&conn, &gateway, &account, &session_id, &mut rx).await;
    }

    guard.release().await;
    tracing::debug!(%account, %conn_id, "channel handler exited");
}

/// Parses the request target and checks the bearer token against it.
fn verify<C, S, A, T>(conn: &C, gateway: &Gateway<S, A, T>) -> Result<Verified, CloseCode>
where
    C: Connection,
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    let request = ChannelRequest::parse(conn.request_path()).map_err(|e| {
        tracing::debug!(conn_id = %conn.id(), error = %e, "bad channel path");
        CloseCode::InvalidEndpoint
    })?;
    let token = request.token.ok_or(CloseCode::TokenMissing)?;

    let claims = gateway.issuer.verify(&token).map_err(|e| match e {
        TokenError::Expired => CloseCode::TokenExpired,
        _ => CloseCode::TokenInvalid,
    })?;
    if claims.sub != request.account {
        tracing::warn!(
            account = %request.account,
            sub = %claims.sub,
            "token subject does not match channel account"
        );
        return Err(CloseCode::SubjectMismatch);
    }

    Ok(Verified {
        account: request.account,
        session_id: claims.session_id,
    })
}

/// Runs until the channel closes for any reason.
async fn run_channel<C, S, A, T>(
    conn: &C,
    gateway: &Gateway<S, A, T>,
    account: &str,
    session_id: &SessionId,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
) where
    C: Connection,
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    let conn_id = conn.id();
    let liveness = gateway.channel.liveness_timeout;
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Notice(notice)) => {
                    if !send_notice(conn, gateway, &notice).await {
                        break;
                    }
                }
                Some(Outbound::Close { code, ack }) => {
                    tracing::info!(%account, %conn_id, %code, "closing channel on registry request");
                    close(conn, code).await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    close(conn, CloseCode::Normal).await;
                    break;
                }
            },
            inbound = tokio::time::timeout_at(deadline, conn.recv()) => match inbound {
                Ok(Ok(Some(frame))) => {
                    deadline = Instant::now() + liveness;
                    gateway.registry.touch(account, conn_id).await;
                    if !on_frame(conn, gateway, account, session_id, &frame).await {
                        break;
                    }
                }
                Ok(Ok(None)) => {
                    tracing::info!(%account, %conn_id, "channel closed by client");
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(%account, %conn_id, error = %e, "recv error");
                    break;
                }
                Err(_) => {
                    tracing::info!(%account, %conn_id, "channel timed out");
                    close(conn, CloseCode::Timeout).await;
                    break;
                }
            },
        }
    }
}

/// Handles one inbound frame. Returns `false` if the channel should end.
async fn on_frame<C, S, A, T>(
    conn: &C,
    gateway: &Gateway<S, A, T>,
    account: &str,
    session_id: &SessionId,
    frame: &str,
) -> bool
where
    C: Connection,
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    let conn_id = conn.id();
    match ClientSignal::parse(frame) {
        ClientSignal::Ping => send_text(conn, PONG).await,
        ClientSignal::Heartbeat => {
            if !send_text(conn, HEARTBEAT_ACK).await {
                return false;
            }
            match gateway.authority.try_touch(session_id).await {
                Ok(_) => true,
                Err(SessionError::NotFound(_)) => {
                    tracing::info!(%account, %conn_id, %session_id, "heartbeat for revoked session");
                    close(conn, CloseCode::SessionRevoked).await;
                    false
                }
                Err(e) => {
                    tracing::warn!(%account, %conn_id, error = %e, "heartbeat could not refresh session");
                    true
                }
            }
        }
        ClientSignal::Text(text) => {
            tracing::info!(%account, %conn_id, len = text.len(), "message from client");
            true
        }
    }
}

async fn send_text<C: Connection>(conn: &C, text: &str) -> bool {
    match conn.send(text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed");
            false
        }
    }
}

/// Encodes and sends a notice. Returns `false` if the channel should end;
/// an encode failure also closes it with the internal-error code.
async fn send_notice<C, S, A, T>(
    conn: &C,
    gateway: &Gateway<S, A, T>,
    notice: &Notice,
) -> bool
where
    C: Connection,
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    let text = match gateway.codec.encode_text(notice) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(conn_id = %conn.id(), error = %e, "failed to encode notice");
            close(conn, CloseCode::InternalError).await;
            return false;
        }
    };
    send_text(conn, &text).await
}

async fn close<C: Connection>(conn: &C, code: CloseCode) {
    if let Err(e) = conn.close(code.code(), code.reason()).await {
        tracing::debug!(conn_id = %conn.id(), %code, error = %e, "close frame not delivered");
    }
}
