//! Link lifecycle state and handshake supervision.
//!
//! Every link, client-facing or server-facing, moves through
//! `Created → Init → Active → Sudo`. The state sits behind a reader/writer
//! lock because the receive loop, hop logic and teardown all consult it.
//! A separate [`watch`] flag records that the handshake finished, which is
//! what the watchdog races its timer against.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use voxmux_net::messages::{Init, PROTO_VER, SERIALIZE_VER, ToSrvCmd};
use voxmux_net::{Peer, SrvPeer};

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkState {
    /// Transport is up, nothing exchanged yet.
    Created,
    /// Hello seen, authentication in progress.
    Init,
    /// Authenticated and forwarding.
    Active,
    /// Elevated, e.g. while changing credentials.
    Sudo,
}

impl LinkState {
    /// Whether game traffic may flow.
    pub fn is_established(self) -> bool {
        matches!(self, LinkState::Active | LinkState::Sudo)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Created => "created",
            LinkState::Init => "init",
            LinkState::Active => "active",
            LinkState::Sudo => "sudo",
        };
        f.write_str(name)
    }
}

/// Shared, observable state of one link.
pub struct StateCell {
    state: RwLock<LinkState>,
    initialized: watch::Sender<bool>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (initialized, _) = watch::channel(false);
        Self {
            state: RwLock::new(LinkState::Created),
            initialized,
        }
    }

    pub async fn get(&self) -> LinkState {
        *self.state.read().await
    }

    /// Move to `state`. Returns the previous state when it actually changed,
    /// so callers fire change hooks only for real transitions.
    pub async fn set(&self, state: LinkState) -> Option<LinkState> {
        let mut current = self.state.write().await;
        let old = std::mem::replace(&mut *current, state);
        (old != state).then_some(old)
    }

    /// Signal that the handshake completed.
    pub fn mark_initialized(&self) {
        self.initialized.send_replace(true);
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Resolves once [`StateCell::mark_initialized`] was called.
    pub async fn initialized(&self) {
        let mut rx = self.initialized.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Close `peer` if the handshake does not complete within `timeout`.
///
/// No kick is sent; the remote side just sees the connection drop.
pub fn spawn_watchdog<In, Out>(
    peer: Arc<Peer<In, Out>>,
    state: Arc<StateCell>,
    timeout: Duration,
    label: String,
) where
    In: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = state.initialized() => {}
            _ = peer.closed() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(dir = "->", link = %label, "handshake timed out");
                peer.close();
            }
        }
    });
}

/// The `Init` a server-facing link opens with.
pub fn init_for(player_name: &str) -> Init {
    Init {
        serialize_ver: SERIALIZE_VER,
        min_proto_ver: PROTO_VER,
        max_proto_ver: PROTO_VER,
        player_name: player_name.to_string(),
    }
}

/// Send `Init` every `interval` until the server answers (the state leaves
/// `Created`) or the connection closes.
pub fn spawn_init_resend(peer: Arc<SrvPeer>, state: Arc<StateCell>, init: Init, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = peer.closed() => break,
            }
            if state.get().await != LinkState::Created {
                break;
            }
            if peer.send(&ToSrvCmd::Init(init.clone())).is_err() {
                break;
            }
        }
    });
}
