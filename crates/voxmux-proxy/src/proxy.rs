//! Proxy orchestration: build the merged content, then admit clients.

use std::sync::Arc;
use std::time::Duration;

use voxmux_config::Config;
use voxmux_net::{ClientSlot, CltPeer, Listener, PeerConfig, SocketConfig};

use crate::auth::{AuthMath, CredentialStore, SrpAuth};
use crate::client::ClientLink;
use crate::content::{self, GlobalContent, MuxError, NoNodeIds, NodeIdRegistry};
use crate::dialer::{Dialer, TcpDialer};
use crate::directory::{DirectoryError, ServerDescriptor, ServerDirectory};
use crate::hooks::HookBus;
use crate::media::{MediaCache, MemoryMediaCache};
use crate::players::PlayerRegistry;
use crate::probe::LinkProber;
use crate::retry::{Backoff, RetryPolicy};

/// Timing and naming shared by every link.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Links that are not initialized by then get closed. Default: 10 s.
    pub handshake_timeout: Duration,
    /// Interval between `Init` resends towards a backend. Default: 500 ms.
    pub init_resend: Duration,
    /// Where clients go when no join hook picks a server. Default: `lobby`.
    pub default_server: String,
    /// Player name used by content probes.
    pub probe_user: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            init_resend: Duration::from_millis(500),
            default_server: "lobby".to_string(),
            probe_user: "voxmux-probe".to_string(),
        }
    }
}

impl From<&Config> for LinkSettings {
    fn from(config: &Config) -> Self {
        Self {
            handshake_timeout: Duration::from_millis(config.proxy.handshake_timeout_ms),
            init_resend: Duration::from_millis(config.proxy.init_resend_ms),
            default_server: config.proxy.default_server.clone(),
            probe_user: config.proxy.probe_user.clone(),
        }
    }
}

/// Everything a link needs from the proxy, shared by `Arc`.
pub struct ProxyContext {
    pub content: Arc<GlobalContent>,
    pub directory: Arc<ServerDirectory>,
    pub hooks: Arc<HookBus>,
    pub players: Arc<PlayerRegistry>,
    pub auth: Arc<dyn AuthMath>,
    pub credentials: Arc<CredentialStore>,
    pub media_cache: Arc<dyn MediaCache>,
    pub dialer: Arc<dyn Dialer>,
    pub settings: LinkSettings,
}

/// Pluggable collaborators of a proxy.
#[derive(Clone)]
pub struct Services {
    pub hooks: Arc<HookBus>,
    pub players: Arc<PlayerRegistry>,
    pub auth: Arc<dyn AuthMath>,
    pub credentials: Arc<CredentialStore>,
    pub media_cache: Arc<dyn MediaCache>,
    pub dialer: Arc<dyn Dialer>,
    pub node_ids: Arc<dyn NodeIdRegistry>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            hooks: Arc::new(HookBus::new()),
            players: Arc::new(PlayerRegistry::new()),
            auth: Arc::new(SrpAuth),
            credentials: Arc::new(CredentialStore::new()),
            media_cache: Arc::new(MemoryMediaCache::new()),
            dialer: Arc::new(TcpDialer::default()),
            node_ids: Arc::new(NoNodeIds),
        }
    }
}

impl Services {
    /// Defaults, with backend dialing tuned from `config`.
    pub fn from_config(config: &Config) -> Self {
        let dialer = TcpDialer {
            socket: SocketConfig::default(),
            peer: peer_config(config),
            connect_timeout: Duration::from_millis(config.proxy.connect_timeout_ms),
        };
        Self {
            dialer: Arc::new(dialer),
            ..Self::default()
        }
    }
}

/// Peer settings for every connection the proxy makes or accepts.
pub fn peer_config(config: &Config) -> PeerConfig {
    PeerConfig {
        idle_timeout: Duration::from_secs(config.proxy.idle_timeout_secs),
        ..PeerConfig::default()
    }
}

/// Failures that stop the proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("content multiplexing failed: {0}")]
    Mux(#[from] MuxError),
    #[error("listener failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A running proxy: merged content plus the services clients share.
pub struct Proxy {
    ctx: Arc<ProxyContext>,
}

impl Proxy {
    /// Wrap content that was already merged.
    pub fn new(
        content: GlobalContent,
        directory: ServerDirectory,
        services: Services,
        settings: LinkSettings,
    ) -> Self {
        let ctx = ProxyContext {
            content: Arc::new(content),
            directory: Arc::new(directory),
            hooks: services.hooks,
            players: services.players,
            auth: services.auth,
            credentials: services.credentials,
            media_cache: services.media_cache,
            dialer: services.dialer,
            settings,
        };
        Self { ctx: Arc::new(ctx) }
    }

    /// Probe every pool and merge, retrying the whole round with backoff
    /// until it succeeds or the policy gives up.
    pub async fn multiplex_with_retry(
        directory: ServerDirectory,
        services: Services,
        settings: LinkSettings,
        policy: RetryPolicy,
    ) -> Result<Self, ProxyError> {
        let prober = Arc::new(LinkProber::new(
            Arc::clone(&services.dialer),
            Arc::clone(&services.auth),
            Arc::clone(&services.media_cache),
            settings.clone(),
        ));
        let mut backoff = Backoff::new(policy);

        let content = loop {
            match content::multiplex(&directory, Arc::clone(&prober), services.node_ids.as_ref()).await {
                Ok(content) => break content,
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(attempts = backoff.attempts(), "giving up on content multiplexing: {e}");
                        return Err(e.into());
                    };
                    tracing::warn!(
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "content multiplexing failed: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        tracing::info!(
            items = content.item_defs.len(),
            nodes = content.node_defs.len(),
            media = content.media.len(),
            "content multiplexed"
        );
        Ok(Self::new(content, directory, services, settings))
    }

    /// Shared state handed to every link.
    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.ctx
    }

    /// The merged content.
    pub fn content(&self) -> &GlobalContent {
        &self.ctx.content
    }

    /// Players currently connected.
    pub fn players(&self) -> &PlayerRegistry {
        &self.ctx.players
    }

    /// Hook bus for registering handlers.
    pub fn hooks(&self) -> &HookBus {
        &self.ctx.hooks
    }

    /// Register a server at runtime, into a pool that is already merged.
    pub async fn add_server(&self, server: ServerDescriptor) -> Result<(), DirectoryError> {
        self.ctx
            .directory
            .add_dynamic(server, &self.ctx.content)
            .await
    }

    /// Unregister a server added with [`Proxy::add_server`].
    pub async fn remove_server(&self, name: &str) -> Result<(), DirectoryError> {
        self.ctx.directory.remove_dynamic(name).await
    }

    /// Start a session for an accepted client connection.
    pub fn admit(&self, peer: CltPeer, label: impl Into<String>, slot: Option<ClientSlot>) -> Arc<ClientLink> {
        ClientLink::spawn(Arc::clone(&self.ctx), peer, label, slot)
    }

    /// Accept clients until the listener shuts down.
    pub async fn serve(&self, listener: &Listener) -> Result<(), ProxyError> {
        while let Some(accepted) = listener.accept().await? {
            self.admit(accepted.peer, accepted.addr.to_string(), Some(accepted.slot));
        }
        tracing::info!(players = self.ctx.players.len().await, "stopped accepting clients");
        Ok(())
    }
}
