//! Server-facing half of a session.
//!
//! A [`BackendLink`] logs in to one backend on behalf of a client, swallows
//! the content announcements (the client already has the merged set) and
//! relays everything else through the rewrite in [`crate::process`].

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock};
use voxmux_net::messages::{CltReady, Init2, Kick, ModChanJoin, ToCltCmd, ToSrvCmd};
use voxmux_net::{Ack, PeerError, SrvPeer};

use crate::auth::{AuthRelay, RelayError};
use crate::client::ClientLink;
use crate::directory::ServerDescriptor;
use crate::process::{self, ServerResources, ToClient};
use crate::proxy::ProxyContext;
use crate::state::{LinkState, StateCell, init_for, spawn_init_resend, spawn_watchdog};

const CONNECTION_LOST: &str = "Server connection closed unexpectedly.";

/// Connection to one backend, made for one client.
pub struct BackendLink {
    name: String,
    pool: String,
    peer: Arc<SrvPeer>,
    state: Arc<StateCell>,
    ctx: Arc<ProxyContext>,
    player_name: String,
    /// Cleared when the client lets go of this link.
    client: RwLock<Weak<ClientLink>>,
    resources: Mutex<ServerResources>,
}

impl BackendLink {
    /// Dial `server` for `client`. The link stays idle until [`BackendLink::start`].
    pub async fn connect(
        ctx: &Arc<ProxyContext>,
        server: &ServerDescriptor,
        client: &Arc<ClientLink>,
    ) -> std::io::Result<Arc<Self>> {
        let player_name = client.name().unwrap_or_default().to_string();
        let peer = ctx
            .dialer
            .dial(server, format!("server {} for {player_name}", server.name))
            .await?;

        tracing::info!(dir = "<->", server = %server.name, client = %player_name, "connect");
        Ok(Arc::new(Self {
            name: server.name.clone(),
            pool: server.media_pool.clone(),
            peer: Arc::new(peer),
            state: Arc::new(StateCell::new()),
            ctx: Arc::clone(ctx),
            player_name,
            client: RwLock::new(Arc::downgrade(client)),
            resources: Mutex::new(ServerResources::default()),
        }))
    }

    /// Begin the handshake and the receive loop.
    pub fn start(self: &Arc<Self>) {
        spawn_init_resend(
            Arc::clone(&self.peer),
            Arc::clone(&self.state),
            init_for(&self.player_name),
            self.ctx.settings.init_resend,
        );
        spawn_watchdog(
            Arc::clone(&self.peer),
            Arc::clone(&self.state),
            self.ctx.settings.handshake_timeout,
            self.name.clone(),
        );
        tokio::spawn(Arc::clone(self).run());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub async fn state(&self) -> LinkState {
        self.state.get().await
    }

    pub fn send(&self, cmd: &ToSrvCmd) -> Result<Ack, PeerError> {
        self.peer.send(cmd)
    }

    pub fn close(&self) {
        self.peer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    pub async fn closed(&self) {
        self.peer.closed().await;
    }

    /// The client this link forwards to, if still attached.
    pub async fn client(&self) -> Option<Arc<ClientLink>> {
        self.client.read().await.upgrade()
    }

    /// Forget the client. Waits for any command being relayed to finish.
    pub async fn detach_client(&self) {
        *self.client.write().await = Weak::new();
    }

    /// Removal commands for everything this link created on the client,
    /// emptying the resource sets.
    pub(crate) async fn drain_removals(&self, pair: &crate::activeobject::CaoPair) -> Vec<ToCltCmd> {
        self.resources.lock().await.drain_removals(pair)
    }

    pub async fn resources_empty(&self) -> bool {
        self.resources.lock().await.is_empty()
    }

    fn send_logged(&self, cmd: ToSrvCmd) {
        tracing::trace!(dir = "->", server = %self.name, cmd = cmd.tag());
        if let Err(e) = self.peer.send(&cmd) {
            tracing::debug!(dir = "->", server = %self.name, "send failed: {e}");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut relay = AuthRelay::new(Arc::clone(&self.ctx.auth), &self.player_name);

        loop {
            let cmd = match self.peer.recv().await {
                Ok(cmd) => cmd,
                Err(PeerError::Closed) => break,
                Err(e) => {
                    tracing::debug!(dir = "<-", server = %self.name, "dropping malformed command: {e}");
                    continue;
                }
            };
            self.handle(&mut relay, cmd).await;
        }

        self.teardown().await;
    }

    async fn handle(&self, relay: &mut AuthRelay, cmd: ToCltCmd) {
        if self.ctx.hooks.server_packet(self, &cmd).await {
            return;
        }

        match cmd {
            ToCltCmd::Hello(hello) => {
                self.state.set(LinkState::Init).await;
                match relay.on_hello(&hello) {
                    Ok(reply) => self.send_logged(reply),
                    Err(RelayError::InvalidMethod) => {
                        tracing::warn!(dir = "<-", server = %self.name, "invalid auth method");
                        self.close();
                    }
                    Err(e) => tracing::warn!(dir = "<-", server = %self.name, "{e}"),
                }
            }
            ToCltCmd::SrpBytesSaltB(salt_b) => match relay.on_salt_b(&salt_b.salt, &salt_b.b) {
                Ok(reply) => self.send_logged(reply),
                Err(e) => tracing::warn!(dir = "<-", server = %self.name, "{e}"),
            },
            ToCltCmd::AcceptAuth(_) => {
                relay.on_accept();
                self.state.set(LinkState::Active).await;
                self.state.mark_initialized();
                tracing::info!(dir = "<-", server = %self.name, client = %self.player_name, "authenticated");

                let Some(client) = self.client().await else { return };
                self.send_logged(ToSrvCmd::Init2(Init2 {
                    lang: client.lang().await,
                }));
                for channel in client.mod_channels().await {
                    self.send_logged(ToSrvCmd::ModChanJoin(ModChanJoin { channel }));
                }
            }
            ToCltCmd::AcceptSudoMode | ToCltCmd::DenySudoMode => {}
            ToCltCmd::ItemDefs(_) | ToCltCmd::NodeDefs(_) | ToCltCmd::Media(_) => {}
            ToCltCmd::AnnounceMedia(_) => {
                let version = match self.client().await {
                    Some(client) => client.version().await,
                    None => CltReady::default(),
                };
                self.send_logged(ToSrvCmd::CltReady(version));
            }
            ToCltCmd::Kick(kick) => {
                tracing::info!(dir = "<-", server = %self.name, reason = ?kick.reason, "deny access");
                let client = self.client.read().await;
                if let Some(client) = client.upgrade() {
                    client.kick(kick).await;
                }
            }
            cmd => self.relay_to_client(cmd).await,
        }
    }

    async fn relay_to_client(&self, cmd: ToCltCmd) {
        // Held for the whole relay so a detach waits for it.
        let client = self.client.read().await;
        let Some(client) = client.upgrade() else { return };

        let out = {
            let mut cao = client.cao_state().write().await;
            let mut resources = self.resources.lock().await;
            let mut seen = client.player_list_seen();
            let out = process::to_client(
                ToClient {
                    content: &self.ctx.content,
                    pool: &self.pool,
                    player_name: &self.player_name,
                    cao: &mut cao,
                    resources: &mut resources,
                    player_list_seen: &mut seen,
                },
                cmd,
            );
            client.set_player_list_seen(seen);
            out
        };

        for cmd in out {
            client.send(&cmd);
        }
    }

    async fn teardown(&self) {
        if self.peer.why_closed().is_some_and(|r| r.is_timeout()) {
            tracing::info!(dir = "<->", server = %self.name, "timeout");
        } else {
            tracing::info!(dir = "<->", server = %self.name, "disconnect");
        }

        let client = self.client.read().await.upgrade();
        if let Some(client) = client {
            if client.is_attached_to(self).await {
                tracing::warn!(dir = "<->", server = %self.name, client = %self.player_name, "backend lost");
                client.kick(Kick::custom(CONNECTION_LOST)).await;
                client.release_backend(self).await;
            }
        }
        self.detach_client().await;
    }
}
