//! Content probe links.
//!
//! A probe logs in to a backend as the configured probe user, collects item
//! and node definitions plus the media catalogue, downloads whatever media
//! the cache does not already have, and disconnects.

use std::sync::Arc;

use voxmux_net::messages::{Init2, ReqMedia, ToCltCmd, ToSrvCmd};
use voxmux_net::{CloseReason, PeerError, SrvPeer};

use crate::auth::{AuthMath, AuthRelay, RelayError};
use crate::content::{Catalogue, MediaFile, Prober};
use crate::dialer::Dialer;
use crate::directory::ServerDescriptor;
use crate::media::MediaCache;
use crate::proxy::LinkSettings;
use crate::state::{LinkState, StateCell, init_for, spawn_init_resend, spawn_watchdog};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to connect: {0}")]
    Connect(#[from] std::io::Error),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("kicked: {0}")]
    Kicked(String),
    #[error("authentication failed: {0}")]
    Auth(RelayError),
    #[error("connection closed before the catalogue was complete")]
    Incomplete,
}

/// Probes servers over real links.
pub struct LinkProber {
    dialer: Arc<dyn Dialer>,
    auth: Arc<dyn AuthMath>,
    cache: Arc<dyn MediaCache>,
    settings: LinkSettings,
}

impl LinkProber {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        auth: Arc<dyn AuthMath>,
        cache: Arc<dyn MediaCache>,
        settings: LinkSettings,
    ) -> Self {
        Self {
            dialer,
            auth,
            cache,
            settings,
        }
    }

    async fn run(&self, server: &ServerDescriptor) -> Result<Catalogue, ProbeError> {
        let peer = Arc::new(
            self.dialer
                .dial(server, format!("content {}", server.name))
                .await?,
        );
        let state = Arc::new(StateCell::new());

        spawn_init_resend(
            Arc::clone(&peer),
            Arc::clone(&state),
            init_for(&self.settings.probe_user),
            self.settings.init_resend,
        );
        spawn_watchdog(
            Arc::clone(&peer),
            Arc::clone(&state),
            self.settings.handshake_timeout,
            server.name.clone(),
        );

        let mut session = ProbeSession {
            peer: &peer,
            state: &state,
            relay: AuthRelay::new(Arc::clone(&self.auth), &self.settings.probe_user),
            cache: self.cache.as_ref(),
            catalogue: Catalogue {
                server: server.name.clone(),
                pool: server.media_pool.clone(),
                ..Default::default()
            },
        };

        loop {
            let cmd = match peer.recv().await {
                Ok(cmd) => cmd,
                Err(PeerError::Closed) => break,
                Err(e) => {
                    tracing::debug!(dir = "<-", content = %server.name, "dropping malformed command: {e}");
                    continue;
                }
            };
            if let Some(result) = session.handle(cmd).await {
                peer.close();
                return result;
            }
        }

        if state.is_initialized() {
            Err(ProbeError::Incomplete)
        } else if peer.why_closed() == Some(CloseReason::Local) {
            Err(ProbeError::HandshakeTimeout)
        } else {
            Err(ProbeError::Incomplete)
        }
    }
}

impl Prober for LinkProber {
    fn probe(
        &self,
        server: &ServerDescriptor,
    ) -> impl std::future::Future<Output = Result<Catalogue, ProbeError>> + Send {
        self.run(server)
    }
}

struct ProbeSession<'a> {
    peer: &'a SrvPeer,
    state: &'a StateCell,
    relay: AuthRelay,
    cache: &'a dyn MediaCache,
    catalogue: Catalogue,
}

impl ProbeSession<'_> {
    fn send(&self, cmd: ToSrvCmd) {
        tracing::trace!(dir = "->", content = %self.catalogue.server, cmd = cmd.tag());
        if let Err(e) = self.peer.send(&cmd) {
            tracing::debug!(dir = "->", content = %self.catalogue.server, "send failed: {e}");
        }
    }

    fn finish(&mut self) -> Option<Result<Catalogue, ProbeError>> {
        tracing::debug!(
            dir = "<->",
            content = %self.catalogue.server,
            items = self.catalogue.item_defs.len(),
            nodes = self.catalogue.node_defs.len(),
            media = self.catalogue.media.len(),
            "catalogue complete"
        );
        Some(Ok(std::mem::take(&mut self.catalogue)))
    }

    /// Handle one command. `Some` ends the probe.
    async fn handle(&mut self, cmd: ToCltCmd) -> Option<Result<Catalogue, ProbeError>> {
        let server = self.catalogue.server.clone();
        match cmd {
            ToCltCmd::Hello(hello) => {
                self.state.set(LinkState::Init).await;
                match self.relay.on_hello(&hello) {
                    Ok(reply) => self.send(reply),
                    Err(RelayError::InvalidMethod) => {
                        tracing::warn!(dir = "<-", content = %server, "invalid auth method");
                        return Some(Err(ProbeError::Auth(RelayError::InvalidMethod)));
                    }
                    Err(e) => tracing::warn!(dir = "<-", content = %server, "{e}"),
                }
            }
            ToCltCmd::SrpBytesSaltB(salt_b) => match self.relay.on_salt_b(&salt_b.salt, &salt_b.b) {
                Ok(reply) => self.send(reply),
                Err(e) => tracing::warn!(dir = "<-", content = %server, "{e}"),
            },
            ToCltCmd::AcceptAuth(_) => {
                self.relay.on_accept();
                self.state.set(LinkState::Active).await;
                self.state.mark_initialized();
                self.send(ToSrvCmd::Init2(Init2::default()));
            }
            ToCltCmd::Kick(kick) => {
                let reason = if kick.custom.is_empty() {
                    format!("{:?}", kick.reason)
                } else {
                    kick.custom
                };
                return Some(Err(ProbeError::Kicked(reason)));
            }
            ToCltCmd::ItemDefs(defs) => {
                self.catalogue.item_defs = defs.defs;
                self.catalogue.aliases = defs.aliases;
            }
            ToCltCmd::NodeDefs(defs) => self.catalogue.node_defs = defs.defs,
            ToCltCmd::AnnounceMedia(announce) => {
                self.catalogue.remotes = announce
                    .url
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect();

                let mut wanted = Vec::new();
                for file in announce.files {
                    let data = self.cache.lookup(&file.name, &file.checksum);
                    if data.is_none() {
                        wanted.push(file.name.clone());
                    }
                    self.catalogue.media.push(MediaFile {
                        name: file.name,
                        checksum: file.checksum,
                        data,
                    });
                }

                if wanted.is_empty() {
                    return self.finish();
                }
                self.send(ToSrvCmd::ReqMedia(ReqMedia { filenames: wanted }));
            }
            ToCltCmd::Media(bunch) => {
                for transfer in bunch.files {
                    if let Some(file) = self
                        .catalogue
                        .media
                        .iter_mut()
                        .find(|f| f.name == transfer.name)
                    {
                        file.data = Some(Arc::from(transfer.data));
                    }
                }
                if bunch.i.saturating_add(1) >= bunch.n {
                    self.cache.store(&self.catalogue.media);
                    return self.finish();
                }
            }
            other => tracing::trace!(dir = "<-", content = %server, cmd = other.tag(), "ignored"),
        }
        None
    }
}
