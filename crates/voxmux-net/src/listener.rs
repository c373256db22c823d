//! Accept loop for game clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};

use crate::messages::{Kick, KickReason, ToCltCmd};
use crate::peer::{CltPeer, Peer, PeerConfig};
use crate::socket::{SocketConfig, configure_stream, create_listener};

/// Identifies one accepted connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing [`ConnectionId`]s, starting at 1.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Default: `0.0.0.0:40000`.
    pub bind_addr: SocketAddr,
    /// Clients beyond this many are kicked with [`KickReason::TooManyClts`]. Default: 128.
    pub max_clients: usize,
    pub socket: SocketConfig,
    pub peer: PeerConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 40000)),
            max_clients: 128,
            socket: SocketConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

/// Holds one of the listener's client slots until dropped.
pub struct ClientSlot {
    _permit: OwnedSemaphorePermit,
}

/// A freshly accepted client connection.
pub struct Accepted {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub peer: CltPeer,
    /// Keep this alive for as long as the session lives.
    pub slot: ClientSlot,
}

/// Accepts client connections, enforcing the client limit.
pub struct Listener {
    listener: TcpListener,
    config: ListenerConfig,
    id_gen: IdGenerator,
    slots: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl Listener {
    /// Bind the configured address.
    pub fn bind(config: ListenerConfig) -> std::io::Result<Self> {
        let listener = create_listener(config.bind_addr, &config.socket)?;
        tracing::info!(addr = %config.bind_addr, "listening");
        Ok(Self::with_listener(listener, config))
    }

    /// Use an already bound listener; `config.bind_addr` is ignored.
    pub fn with_listener(listener: TcpListener, config: ListenerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            listener,
            slots: Arc::new(Semaphore::new(config.max_clients)),
            config,
            id_gen: IdGenerator::new(),
            shutdown_tx,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of client slots in use.
    pub fn active_clients(&self) -> usize {
        self.config.max_clients - self.slots.available_permits()
    }

    /// Wait for the next admissible client. Returns `Ok(None)` once
    /// [`Listener::shutdown`] was called.
    pub async fn accept(&self) -> std::io::Result<Option<Accepted>> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                return Ok(None);
            }

            let (stream, addr) = tokio::select! {
                result = self.listener.accept() => result?,
                _ = shutdown_rx.changed() => continue,
            };

            if let Err(e) = configure_stream(&stream, &self.config.socket) {
                tracing::warn!(%addr, "failed to configure client socket: {e}");
            }

            let id = self.id_gen.next_id();
            let peer: CltPeer = Peer::spawn(stream, addr.to_string(), self.config.peer.clone());

            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                tracing::warn!(%addr, "<-> client limit reached, rejecting");
                tokio::spawn(async move {
                    if let Ok(ack) = peer.send(&ToCltCmd::Kick(Kick::new(KickReason::TooManyClts))) {
                        let _ = ack.await;
                    }
                    peer.close();
                });
                continue;
            };

            tracing::info!(conn = %id, %addr, "<-> connect");
            return Ok(Some(Accepted {
                id,
                addr,
                peer,
                slot: ClientSlot { _permit: permit },
            }));
        }
    }

    /// Stop accepting. Sessions already accepted are unaffected.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        tracing::info!("listener shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ChatMsgToSrv, ToSrvCmd};
    use crate::peer::SrvPeer;
    use crate::socket::dial;
    use std::time::Duration;

    async fn test_listener(max_clients: usize) -> (Arc<Listener>, String) {
        let config = ListenerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_clients,
            ..Default::default()
        };
        let listener = Listener::bind(config).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (Arc::new(listener), addr)
    }

    async fn connect(addr: &str) -> SrvPeer {
        let stream = dial(addr, Duration::from_secs(1), &SocketConfig::default())
            .await
            .unwrap();
        Peer::spawn(stream, "test-client", PeerConfig::default())
    }

    #[tokio::test]
    async fn test_accepted_peer_is_usable() {
        let (listener, addr) = test_listener(4).await;
        let client = connect(&addr).await;

        let accepted = listener.accept().await.unwrap().unwrap();
        client
            .send(&ToSrvCmd::ChatMsg(ChatMsgToSrv { msg: "hi".into() }))
            .unwrap()
            .await
            .unwrap();

        assert!(matches!(accepted.peer.recv().await.unwrap(), ToSrvCmd::ChatMsg(m) if m.msg == "hi"));
        assert_eq!(listener.active_clients(), 1);
    }

    #[tokio::test]
    async fn test_client_limit_kicks_with_typed_reason() {
        let (listener, addr) = test_listener(1).await;

        let _first_client = connect(&addr).await;
        let first = listener.accept().await.unwrap().unwrap();

        let second_client = connect(&addr).await;
        let accept_task = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };

        match second_client.recv().await.unwrap() {
            ToCltCmd::Kick(kick) => assert_eq!(kick.reason, KickReason::TooManyClts),
            other => panic!("expected kick, got {other:?}"),
        }

        // Freeing the slot admits the next client.
        drop(first);
        let _third_client = connect(&addr).await;
        let third = accept_task.await.unwrap().unwrap().unwrap();
        assert_eq!(third.id, ConnectionId(3));
    }

    #[tokio::test]
    async fn test_shutdown_ends_accept() {
        let (listener, _addr) = test_listener(4).await;
        let task = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.shutdown();
        assert!(task.await.unwrap().unwrap().is_none());
    }

    #[test]
    fn test_connection_ids_are_sequential() {
        let id_gen = IdGenerator::new();
        assert_eq!(id_gen.next_id(), ConnectionId(1));
        assert_eq!(id_gen.next_id(), ConnectionId(2));
        assert_eq!(ConnectionId(7).to_string(), "#7");
    }
}
