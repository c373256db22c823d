//! Call interface for extensions.
//!
//! Extensions register [`ClientHook`]s to follow session lifecycles and
//! [`PacketHook`]s to look at raw traffic before the proxy rewrites it. How
//! they get loaded is up to the embedding binary; the proxy only sees the
//! [`HookBus`] it is handed at startup.

use std::sync::Arc;

use tokio::sync::RwLock;
use voxmux_net::messages::{Kick, ToCltCmd, ToSrvCmd};

use crate::backend::BackendLink;
use crate::client::ClientLink;
use crate::state::LinkState;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaveReason {
    /// The client went away on its own (or timed out).
    Exit,
    /// The proxy kicked the client.
    Kick(Kick),
}

/// Session lifecycle notifications. Every method has a no-op default.
pub trait ClientHook: Send + Sync {
    /// Pick the server a new session starts on. `None` defers to other hooks
    /// or the configured default.
    fn on_join(&self, _client: &ClientLink) -> Option<String> {
        None
    }

    fn on_state_change(&self, _client: &ClientLink, _old: LinkState, _new: LinkState) {}

    fn on_leave(&self, _client: &ClientLink, _reason: &LeaveReason) {}

    /// `source` and `destination` are server names.
    fn on_hop(&self, _client: &ClientLink, _source: &str, _destination: &str) {}
}

/// First look at raw inbound commands.
///
/// Returning `true` marks the command as handled, and the proxy will not
/// process or forward it. All hooks see every command regardless.
pub trait PacketHook: Send + Sync {
    fn client_packet(&self, _client: &ClientLink, _cmd: &ToSrvCmd) -> bool {
        false
    }

    fn server_packet(&self, _backend: &BackendLink, _cmd: &ToCltCmd) -> bool {
        false
    }
}

/// Registered hooks, read on every event and written only at startup.
#[derive(Default)]
pub struct HookBus {
    client_hooks: RwLock<Vec<Arc<dyn ClientHook>>>,
    packet_hooks: RwLock<Vec<Arc<dyn PacketHook>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_client_hook(&self, hook: Arc<dyn ClientHook>) {
        self.client_hooks.write().await.push(hook);
    }

    pub async fn register_packet_hook(&self, hook: Arc<dyn PacketHook>) {
        self.packet_hooks.write().await.push(hook);
    }

    /// Destination chosen by the hooks. The last hook naming one wins.
    pub async fn join(&self, client: &ClientLink) -> Option<String> {
        let hooks = self.client_hooks.read().await;
        let mut destination = None;
        for hook in hooks.iter() {
            if let Some(dest) = hook.on_join(client).filter(|d| !d.is_empty()) {
                destination = Some(dest);
            }
        }
        destination
    }

    pub async fn state_change(&self, client: &ClientLink, old: LinkState, new: LinkState) {
        for hook in self.client_hooks.read().await.iter() {
            hook.on_state_change(client, old, new);
        }
    }

    pub async fn leave(&self, client: &ClientLink, reason: &LeaveReason) {
        for hook in self.client_hooks.read().await.iter() {
            hook.on_leave(client, reason);
        }
    }

    pub async fn hop(&self, client: &ClientLink, source: &str, destination: &str) {
        for hook in self.client_hooks.read().await.iter() {
            hook.on_hop(client, source, destination);
        }
    }

    pub async fn client_packet(&self, client: &ClientLink, cmd: &ToSrvCmd) -> bool {
        let mut handled = false;
        for hook in self.packet_hooks.read().await.iter() {
            handled |= hook.client_packet(client, cmd);
        }
        handled
    }

    pub async fn server_packet(&self, backend: &BackendLink, cmd: &ToCltCmd) -> bool {
        let mut handled = false;
        for hook in self.packet_hooks.read().await.iter() {
            handled |= hook.server_packet(backend, cmd);
        }
        handled
    }
}
