//! Opening connections to backends.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use voxmux_net::{Peer, PeerConfig, SocketConfig, SrvPeer};

use crate::directory::ServerDescriptor;

pub type DialFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<SrvPeer>> + Send + 'a>>;

/// Connects to a backend server. Tests substitute in-memory backends.
pub trait Dialer: Send + Sync {
    /// `label` names the link in log lines.
    fn dial<'a>(&'a self, server: &'a ServerDescriptor, label: String) -> DialFuture<'a>;
}

/// Dials backends over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub socket: SocketConfig,
    pub peer: PeerConfig,
    /// Default: 5 s.
    pub connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            peer: PeerConfig::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, server: &'a ServerDescriptor, label: String) -> DialFuture<'a> {
        Box::pin(async move {
            let stream = voxmux_net::dial(&server.address, self.connect_timeout, &self.socket).await?;
            Ok(Peer::spawn(stream, label, self.peer.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxmux_net::{ToSrvCmd, create_listener};

    #[tokio::test]
    async fn test_tcp_dialer_connects() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default()).unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = TcpDialer {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let server = ServerDescriptor {
            name: "lobby".into(),
            address: addr.to_string(),
            media_pool: "lobby".into(),
            fallbacks: Vec::new(),
            dynamic: false,
        };

        let (dialed, accepted) = tokio::join!(dialer.dial(&server, "server lobby".into()), listener.accept());
        let peer = dialed.unwrap();
        assert_eq!(peer.label(), "server lobby");
        let (stream, _) = accepted.unwrap();
        drop(stream);

        peer.closed().await;
        assert!(matches!(peer.send(&ToSrvCmd::Init2(Default::default())), Err(_)));
    }

    #[tokio::test]
    async fn test_tcp_dialer_reports_refusal() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default()).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TcpDialer {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let server = ServerDescriptor {
            name: "gone".into(),
            address: addr.to_string(),
            media_pool: "gone".into(),
            fallbacks: Vec::new(),
            dynamic: false,
        };
        assert!(dialer.dial(&server, "server gone".into()).await.is_err());
    }
}
