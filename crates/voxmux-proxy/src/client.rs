//! Client-facing half of a session.
//!
//! A [`ClientLink`] plays the server towards a real game client: it runs the
//! login handshake against the proxy's own credential store, hands out the
//! merged content, and then attaches the session to a backend. Hopping
//! swaps that backend without the client reconnecting.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::{Mutex, RwLock};
use voxmux_net::messages::{
    AcceptAuth, AnnounceMedia, AnnouncedMedia, AuthMethods, CltReady, Content, Hello, Init,
    ItemDefs, Kick, KickReason, NodeDefs, PROTO_VER, SERIALIZE_VER, SrpBytesSaltB, ToCltCmd,
    ToSrvCmd,
};
use voxmux_net::{ClientSlot, CltPeer, PeerError};

use crate::activeobject::{CaoPair, CaoState};
use crate::auth::{AuthMathError, Credentials, ServerChallenge};
use crate::backend::BackendLink;
use crate::hooks::LeaveReason;
use crate::media;
use crate::process;
use crate::proxy::ProxyContext;
use crate::state::{LinkState, StateCell, spawn_watchdog};

/// Longest accepted player name.
pub const MAX_NAME_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum HopError {
    #[error("no server named {0:?}")]
    UnknownServer(String),
    #[error("already attached to {0:?}")]
    AlreadyThere(String),
    #[error("client connection is closed")]
    Closed,
    #[error("could not reach {server:?} or its fallbacks: {source}")]
    Connect {
        server: String,
        #[source]
        source: std::io::Error,
    },
}

fn valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_')
}

/// Kick reason for an unacceptable player name, if any.
pub fn check_name(name: &str) -> Option<KickReason> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        Some(KickReason::BadName)
    } else if !name.chars().all(valid_name_char) {
        Some(KickReason::BadNameChars)
    } else {
        None
    }
}

/// An SRP exchange the client started.
struct PendingSrp {
    challenge: ServerChallenge,
    verifier: Vec<u8>,
    a_pub: Vec<u8>,
}

/// The proxy's session with one game client.
pub struct ClientLink {
    label: String,
    peer: Arc<CltPeer>,
    ctx: Arc<ProxyContext>,
    state: Arc<StateCell>,
    name: OnceLock<String>,
    lang: RwLock<String>,
    version: RwLock<CltReady>,
    backend: RwLock<Option<Arc<BackendLink>>>,
    hop_lock: Mutex<()>,
    cao: RwLock<CaoState>,
    mod_channels: RwLock<HashSet<String>>,
    player_list_seen: AtomicBool,
    kicked: Mutex<Option<Kick>>,
    self_ref: Weak<ClientLink>,
    _slot: Option<ClientSlot>,
}

impl ClientLink {
    /// Take over an accepted connection: starts the watchdog and the
    /// receive loop.
    pub fn spawn(
        ctx: Arc<ProxyContext>,
        peer: CltPeer,
        label: impl Into<String>,
        slot: Option<ClientSlot>,
    ) -> Arc<Self> {
        let label = label.into();
        let link = Arc::new_cyclic(|self_ref| Self {
            label,
            peer: Arc::new(peer),
            ctx,
            state: Arc::new(StateCell::new()),
            name: OnceLock::new(),
            lang: RwLock::new(String::new()),
            version: RwLock::new(CltReady::default()),
            backend: RwLock::new(None),
            hop_lock: Mutex::new(()),
            cao: RwLock::new(CaoState::default()),
            mod_channels: RwLock::new(HashSet::new()),
            player_list_seen: AtomicBool::new(false),
            kicked: Mutex::new(None),
            self_ref: self_ref.clone(),
            _slot: slot,
        });

        spawn_watchdog(
            Arc::clone(&link.peer),
            Arc::clone(&link.state),
            link.ctx.settings.handshake_timeout,
            link.label.clone(),
        );
        tokio::spawn(Arc::clone(&link).run());
        link
    }

    /// The player's name, once the client introduced itself.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn state(&self) -> LinkState {
        self.state.get().await
    }

    pub async fn lang(&self) -> String {
        self.lang.read().await.clone()
    }

    /// Version information from the client's `CltReady`.
    pub async fn version(&self) -> CltReady {
        self.version.read().await.clone()
    }

    pub async fn mod_channels(&self) -> Vec<String> {
        self.mod_channels.read().await.iter().cloned().collect()
    }

    pub async fn cao(&self) -> CaoPair {
        self.cao.read().await.pair
    }

    pub(crate) fn cao_state(&self) -> &RwLock<CaoState> {
        &self.cao
    }

    pub(crate) fn player_list_seen(&self) -> bool {
        self.player_list_seen.load(Ordering::Acquire)
    }

    pub(crate) fn set_player_list_seen(&self, seen: bool) {
        self.player_list_seen.store(seen, Ordering::Release);
    }

    pub async fn backend(&self) -> Option<Arc<BackendLink>> {
        self.backend.read().await.clone()
    }

    /// Name of the attached server.
    pub async fn server_name(&self) -> Option<String> {
        self.backend
            .read()
            .await
            .as_ref()
            .map(|b| b.name().to_string())
    }

    /// Translate a global content id into the attached server's id. `None`
    /// when the id belongs to another pool or no server is attached.
    ///
    /// No client command carries content ids, so the relay never needs this
    /// direction; it is for code holding a session from
    /// [`PlayerRegistry::get`](crate::PlayerRegistry::get), such as admin
    /// commands that act on a player's current world.
    pub async fn server_content_id(&self, global: Content) -> Option<Content> {
        let backend = self.backend.read().await;
        let pool = backend.as_ref()?.pool();
        self.ctx.content.to_pool(pool, global)
    }

    pub fn send(&self, cmd: &ToCltCmd) {
        tracing::trace!(dir = "->", client = %self.label, cmd = cmd.tag());
        if let Err(e) = self.peer.send(cmd) {
            tracing::debug!(dir = "->", client = %self.label, "send failed: {e}");
        }
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

    /// Send `kick`, wait until it was delivered or the client is gone, then
    /// close the connection.
    pub async fn kick(&self, kick: Kick) {
        tracing::info!(dir = "->", client = %self.label, reason = ?kick.reason, custom = %kick.custom, "kick");
        {
            let mut kicked = self.kicked.lock().await;
            if kicked.is_none() {
                *kicked = Some(kick.clone());
            }
        }

        if let Ok(ack) = self.peer.send(&ToCltCmd::Kick(kick)) {
            tokio::select! {
                _ = ack => {}
                _ = self.peer.closed() => {}
            }
        }
        self.peer.close();
    }

    pub(crate) async fn is_attached_to(&self, backend: &BackendLink) -> bool {
        self.backend
            .read()
            .await
            .as_ref()
            .is_some_and(|b| std::ptr::eq(Arc::as_ptr(b), backend))
    }

    /// Drop the attachment if it is still `backend`.
    pub(crate) async fn release_backend(&self, backend: &BackendLink) {
        let mut slot = self.backend.write().await;
        if slot
            .as_ref()
            .is_some_and(|b| std::ptr::eq(Arc::as_ptr(b), backend))
        {
            *slot = None;
        }
    }

    async fn set_state(&self, new: LinkState) {
        if let Some(old) = self.state.set(new).await {
            tracing::debug!(dir = "<->", client = %self.label, %old, %new, "state change");
            self.ctx.hooks.state_change(self, old, new).await;
        }
    }

    /// Attach to `destination`, detaching from the current server first.
    ///
    /// The new server is dialed before anything is torn down, so a failed
    /// hop leaves the session where it was. The destination's fallbacks are
    /// tried in order when it cannot be reached.
    pub async fn hop(&self, destination: &str) -> Result<(), HopError> {
        let _hopping = self.hop_lock.lock().await;

        let Some(this) = self.self_ref.upgrade() else {
            return Err(HopError::Closed);
        };
        if self.is_closed() {
            return Err(HopError::Closed);
        }
        if self.server_name().await.as_deref() == Some(destination) {
            return Err(HopError::AlreadyThere(destination.to_string()));
        }

        let directory = &self.ctx.directory;
        let server = directory
            .get(destination)
            .await
            .ok_or_else(|| HopError::UnknownServer(destination.to_string()))?;

        let mut candidates = vec![server.clone()];
        for fallback in &server.fallbacks {
            if let Some(desc) = directory.get(fallback).await {
                candidates.push(desc);
            }
        }

        let mut last_error = None;
        let mut link = None;
        for candidate in &candidates {
            match BackendLink::connect(&self.ctx, candidate, &this).await {
                Ok(backend) => {
                    link = Some(backend);
                    break;
                }
                Err(e) => {
                    tracing::warn!(dir = "->", client = %self.label, server = %candidate.name, "connect failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        let Some(link) = link else {
            return Err(HopError::Connect {
                server: destination.to_string(),
                source: last_error
                    .unwrap_or_else(|| std::io::Error::other("no candidate servers")),
            });
        };

        let source = {
            let mut slot = self.backend.write().await;
            // Teardown may have run while dialing; it will not look again.
            if self.is_closed() {
                drop(slot);
                link.detach_client().await;
                link.close();
                tracing::debug!(dir = "<->", client = %self.label, server = %link.name(), "hop abandoned");
                return Err(HopError::Closed);
            }
            let source = match slot.take() {
                Some(old) => {
                    self.detach(&old).await;
                    Some(old.name().to_string())
                }
                None => None,
            };
            *slot = Some(Arc::clone(&link));
            link.start();
            source
        };

        match source {
            Some(source) => {
                tracing::info!(dir = "<->", client = %self.label, from = %source, to = %link.name(), "hop");
                self.ctx.hooks.hop(self, &source, link.name()).await;
            }
            None => tracing::info!(dir = "<->", client = %self.label, server = %link.name(), "attached"),
        }
        Ok(())
    }

    /// Tear `old` off this session and make the client forget what it
    /// created.
    async fn detach(&self, old: &BackendLink) {
        old.detach_client().await;
        old.close();

        let pair = self.cao.read().await.pair;
        for cmd in old.drain_removals(&pair).await {
            self.send(&cmd);
        }
        self.cao.write().await.detach();
    }

    async fn run(self: Arc<Self>) {
        let mut pending: Option<PendingSrp> = None;

        loop {
            let cmd = match self.peer.recv().await {
                Ok(cmd) => cmd,
                Err(PeerError::Closed) => break,
                Err(e) => {
                    tracing::debug!(dir = "<-", client = %self.label, "dropping malformed command: {e}");
                    continue;
                }
            };
            self.handle(&mut pending, cmd).await;
        }

        self.teardown().await;
    }

    async fn handle(&self, pending: &mut Option<PendingSrp>, cmd: ToSrvCmd) {
        if self.ctx.hooks.client_packet(self, &cmd).await {
            return;
        }

        match cmd {
            ToSrvCmd::Init(init) => self.on_init(init).await,
            ToSrvCmd::FirstSrp(first) => {
                let Some(name) = self.name() else { return };
                let credentials = Credentials {
                    salt: first.salt,
                    verifier: first.verifier,
                };
                match self.state().await {
                    LinkState::Init if !self.ctx.credentials.contains(name) => {
                        self.ctx.credentials.set(name, credentials);
                        self.accept_auth().await;
                    }
                    LinkState::Sudo => {
                        self.ctx.credentials.set(name, credentials);
                        tracing::info!(dir = "<-", client = %self.label, "credentials changed");
                        self.set_state(LinkState::Active).await;
                    }
                    LinkState::Init => {
                        tracing::warn!(dir = "<-", client = %self.label, "unexpected authentication");
                        self.kick(Kick::new(KickReason::UnexpectedData)).await;
                    }
                    _ => tracing::warn!(dir = "<-", client = %self.label, "unexpected authentication"),
                }
            }
            ToSrvCmd::SrpBytesA(a) => {
                let state = self.state().await;
                if !matches!(state, LinkState::Init | LinkState::Active) {
                    tracing::warn!(dir = "<-", client = %self.label, "unexpected authentication");
                    return;
                }
                if pending.is_some() {
                    tracing::warn!(dir = "<-", client = %self.label, "multiple authentication attempts");
                    return;
                }
                let Some(credentials) = self.name().and_then(|n| self.ctx.credentials.get(n)) else {
                    tracing::warn!(dir = "<-", client = %self.label, "unexpected authentication");
                    if state == LinkState::Init {
                        self.kick(Kick::new(KickReason::UnexpectedData)).await;
                    } else {
                        self.send(&ToCltCmd::DenySudoMode);
                    }
                    return;
                };

                let challenge = self.ctx.auth.challenge(&credentials.verifier);
                self.send(&ToCltCmd::SrpBytesSaltB(SrpBytesSaltB {
                    salt: credentials.salt,
                    b: challenge.b_pub.clone(),
                }));
                *pending = Some(PendingSrp {
                    challenge,
                    verifier: credentials.verifier,
                    a_pub: a.a,
                });
            }
            ToSrvCmd::SrpBytesM(m) => {
                let Some(srp) = pending.take() else {
                    tracing::warn!(dir = "<-", client = %self.label, "unexpected authentication");
                    return;
                };
                let verdict = self
                    .ctx
                    .auth
                    .verify(&srp.challenge, &srp.verifier, &srp.a_pub, &m.m);
                let state = self.state().await;
                match verdict {
                    Ok(_key) if state == LinkState::Init => self.accept_auth().await,
                    Ok(_key) => {
                        self.send(&ToCltCmd::AcceptSudoMode);
                        self.set_state(LinkState::Sudo).await;
                    }
                    Err(e) => {
                        match e {
                            AuthMathError::SafetyCheck => {
                                tracing::warn!(dir = "<-", client = %self.label, "SRP safety check failed");
                            }
                            AuthMathError::Handshake(reason) => {
                                tracing::warn!(dir = "<-", client = %self.label, %reason, "SRP handshake failed");
                            }
                        }
                        if state == LinkState::Init {
                            self.kick(Kick::new(KickReason::WrongPasswd)).await;
                        } else {
                            self.send(&ToCltCmd::DenySudoMode);
                        }
                    }
                }
            }
            ToSrvCmd::Init2(init2) => {
                if !self.state().await.is_established() {
                    tracing::warn!(dir = "<-", client = %self.label, "Init2 before authentication");
                    return;
                }
                *self.lang.write().await = init2.lang;
                self.announce_content();
            }
            ToSrvCmd::ReqMedia(req) => {
                for bunch in media::bunch_media(&self.ctx.content, &req.filenames, &self.label) {
                    self.send(&ToCltCmd::Media(bunch));
                }
            }
            ToSrvCmd::CltReady(ready) => {
                *self.version.write().await = ready;
                if self.backend().await.is_some() {
                    return;
                }
                let destination = match self.ctx.hooks.join(self).await {
                    Some(dest) => dest,
                    None => self.ctx.settings.default_server.clone(),
                };
                if let Err(e) = self.hop(&destination).await {
                    tracing::warn!(dir = "->", client = %self.label, server = %destination, "attach failed: {e}");
                    self.kick(Kick::custom(format!("Unable to connect to {destination}: {e}")))
                        .await;
                }
            }
            ToSrvCmd::Interact(mut interact) => {
                let pair = self.cao().await;
                process::interact_to_server(&pair, &mut interact);
                self.forward(ToSrvCmd::Interact(interact)).await;
            }
            ToSrvCmd::ModChanJoin(join) => {
                self.mod_channels.write().await.insert(join.channel.clone());
                self.forward(ToSrvCmd::ModChanJoin(join)).await;
            }
            ToSrvCmd::ModChanLeave(leave) => {
                self.mod_channels.write().await.remove(&leave.channel);
                self.forward(ToSrvCmd::ModChanLeave(leave)).await;
            }
            cmd => self.forward(cmd).await,
        }
    }

    async fn on_init(&self, init: Init) {
        // Clients resend Init until they hear back.
        if self.state().await != LinkState::Created || self.name().is_some() {
            return;
        }

        if init.serialize_ver != SERIALIZE_VER {
            tracing::warn!(dir = "<-", client = %self.label, version = init.serialize_ver, "invalid serialization version");
            self.kick(Kick::new(KickReason::UnsupportedVer)).await;
            return;
        }
        if !(init.min_proto_ver..=init.max_proto_ver).contains(&PROTO_VER) {
            tracing::warn!(dir = "<-", client = %self.label, min = init.min_proto_ver, max = init.max_proto_ver, "unsupported protocol version");
            self.kick(Kick::new(KickReason::UnsupportedVer)).await;
            return;
        }
        if let Some(reason) = check_name(&init.player_name) {
            self.kick(Kick::new(reason)).await;
            return;
        }

        let Some(this) = self.self_ref.upgrade() else { return };
        if let Err(e) = self.ctx.players.register(&init.player_name, &this).await {
            tracing::info!(dir = "<-", client = %self.label, "{e}");
            self.kick(Kick::new(KickReason::AlreadyConnected)).await;
            return;
        }
        let name = self.name.get_or_init(|| init.player_name.clone());
        tracing::info!(dir = "<-", client = %self.label, player = %name, "player joined");

        self.set_state(LinkState::Init).await;
        let auth_methods = if self.ctx.credentials.contains(name) {
            AuthMethods::SRP
        } else {
            AuthMethods::FIRST_SRP
        };
        self.send(&ToCltCmd::Hello(Hello {
            serialize_ver: SERIALIZE_VER,
            proto_ver: PROTO_VER,
            auth_methods,
            username: name.clone(),
        }));
    }

    async fn accept_auth(&self) {
        self.send(&ToCltCmd::AcceptAuth(AcceptAuth::default()));
        self.set_state(LinkState::Active).await;
        self.state.mark_initialized();
    }

    fn announce_content(&self) {
        let content = &self.ctx.content;
        self.send(&ToCltCmd::ItemDefs(ItemDefs {
            defs: content.item_defs.clone(),
            aliases: content.aliases.clone(),
        }));
        self.send(&ToCltCmd::NodeDefs(NodeDefs {
            defs: content.node_defs.clone(),
        }));
        self.send(&ToCltCmd::AnnounceMedia(AnnounceMedia {
            files: content
                .media
                .iter()
                .map(|f| AnnouncedMedia {
                    name: f.name.clone(),
                    checksum: f.checksum.clone(),
                })
                .collect(),
            url: content.remotes.join(","),
        }));
    }

    /// Pass a command on to the attached server once it is logged in.
    async fn forward(&self, cmd: ToSrvCmd) {
        let Some(backend) = self.backend().await else { return };
        if backend.state().await != LinkState::Active {
            return;
        }
        if let Err(e) = backend.send(&cmd) {
            tracing::debug!(dir = "->", server = %backend.name(), "forward failed: {e}");
        }
    }

    async fn teardown(&self) {
        if self.peer.why_closed().is_some_and(|r| r.is_timeout()) {
            tracing::info!(dir = "<->", client = %self.label, "timeout");
        } else {
            tracing::info!(dir = "<->", client = %self.label, "disconnect");
        }

        if let Some(name) = self.name() {
            let reason = match self.kicked.lock().await.take() {
                Some(kick) => LeaveReason::Kick(kick),
                None => LeaveReason::Exit,
            };
            self.ctx.hooks.leave(self, &reason).await;
            self.ctx.players.remove(name).await;
        }

        let mut slot = self.backend.write().await;
        if let Some(backend) = slot.take() {
            backend.detach_client().await;
            backend.close();
        }
    }
}
