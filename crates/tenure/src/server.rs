//! `TenureServer` builder and server loop.
//!
//! This is the entry point for running a tenure server. It ties together
//! all the layers: transport → channel handler → registry and session
//! authority, with the reaper running alongside.

use std::future::Future;
use std::sync::Arc;

use tenure_reaper::{Reaper, ReaperConfig};
use tenure_registry::{ConnectionRegistry, RegistryConfig};
use tenure_session::{Authenticator, SessionAuthority, SessionConfig, SessionStore, TokenIssuer};
use tenure_transport::{Transport, WebSocketTransport};

use crate::handler::handle_channel;
use crate::{ChannelConfig, Gateway, TenureError};

/// Builder for configuring and starting a tenure server.
///
/// # Example
///
/// ```rust,ignore
/// use tenure::prelude::*;
///
/// let users = StaticDirectory::new().with_user("alice", "Alice", "pw", false);
/// let server = TenureServer::builder()
///     .bind("0.0.0.0:8000")
///     .build(MemoryStore::new(), users, JwtIssuer::new(b"secret", Duration::from_secs(3600)))
///     .await?;
/// server.run().await
/// ```
pub struct TenureServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    registry_config: RegistryConfig,
    channel_config: ChannelConfig,
    reaper_config: ReaperConfig,
}

impl TenureServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            session_config: SessionConfig::default(),
            registry_config: RegistryConfig::default(),
            channel_config: ChannelConfig::default(),
            reaper_config: ReaperConfig::default(),
        }
    }

    /// Sets the address to bind the channel endpoint to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    pub fn reaper_config(mut self, config: ReaperConfig) -> Self {
        self.reaper_config = config;
        self
    }

    /// Binds the listener and assembles the shared state.
    ///
    /// Nothing is accepted and the reaper doesn't start until
    /// [`TenureServer::run`].
    pub async fn build<S, A, T>(
        self,
        store: S,
        authenticator: A,
        issuer: T,
    ) -> Result<TenureServer<S, A, T>, TenureError>
    where
        S: SessionStore,
        A: Authenticator,
        T: TokenIssuer,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let authority = Arc::new(SessionAuthority::new(store, self.session_config));
        let registry = Arc::new(ConnectionRegistry::new(self.registry_config));
        let gateway = Arc::new(Gateway::new(
            authority,
            registry,
            authenticator,
            issuer,
            self.channel_config,
        ));

        Ok(TenureServer {
            transport,
            gateway,
            reaper_config: self.reaper_config,
        })
    }
}

impl Default for TenureServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound tenure server.
///
/// Call [`run()`](Self::run) to start accepting channels. Login, logout,
/// and the listings go through [`gateway()`](Self::gateway), which stays
/// usable while the server runs.
pub struct TenureServer<S: SessionStore, A: Authenticator, T: TokenIssuer> {
    transport: WebSocketTransport,
    gateway: Arc<Gateway<S, A, T>>,
    reaper_config: ReaperConfig,
}

impl<S, A, T> TenureServer<S, A, T>
where
    S: SessionStore,
    A: Authenticator,
    T: TokenIssuer,
{
    /// Creates a new builder.
    pub fn builder() -> TenureServerBuilder {
        TenureServerBuilder::new()
    }

    /// Returns the local address the channel endpoint is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn gateway(&self) -> Arc<Gateway<S, A, T>> {
        Arc::clone(&self.gateway)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), TenureError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then stops the
    /// reaper. Channels already open keep running on their own tasks.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), TenureError> {
        let reaper = Reaper::new(
            Arc::clone(&self.gateway.authority),
            Arc::clone(&self.gateway.registry),
            self.reaper_config.clone(),
        )
        .spawn();
        tracing::info!(addr = ?self.local_addr().ok(), "tenure server running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("tenure server shutting down");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let gateway = Arc::clone(&self.gateway);
                        tokio::spawn(handle_channel(conn, gateway));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        reaper.shutdown().await;
        self.transport.shutdown().await?;
        Ok(())
    }
}
