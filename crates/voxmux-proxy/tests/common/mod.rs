//! In-memory backends and clients for driving a proxy end to end.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voxmux_net::messages::{
    AcceptAuth, AnnounceMedia, AnnouncedMedia, AuthMethods, CltReady, Content, FirstSrp, Hello,
    Init, Init2, ItemDefs, MediaBunch, MediaTransfer, NodeDef, NodeDefs, PROTO_VER, SERIALIZE_VER,
    ToCltCmd, ToSrvCmd,
};
use voxmux_net::{CltPeer, PeerConfig, PeerError, SrvPeer, memory_pair};
use voxmux_proxy::dialer::DialFuture;
use voxmux_proxy::{
    ClientLink, Dialer, LinkSettings, Proxy, ProxyError, RetryPolicy, ServerDescriptor,
    ServerDirectory, Services,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// What a fake backend serves.
#[derive(Clone, Default)]
pub struct ServerScript {
    pub nodes: Vec<(Content, String)>,
    pub media: Vec<(String, Vec<u8>)>,
    pub remotes: String,
    /// Sent to a session right after its `CltReady`.
    pub on_ready: Vec<ToCltCmd>,
    /// Never answer `Init`.
    pub silent: bool,
}

/// A scripted backend that accepts any login.
pub struct FakeServer {
    pub name: String,
    script: ServerScript,
    dials: AtomicUsize,
    dial_delay: Mutex<Duration>,
    connections: Mutex<Vec<Arc<CltPeer>>>,
    ready: Mutex<Vec<Arc<CltPeer>>>,
    received: Mutex<Vec<ToSrvCmd>>,
}

impl FakeServer {
    pub fn new(name: &str, script: ServerScript) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            dials: AtomicUsize::new(0),
            dial_delay: Mutex::new(Duration::ZERO),
            connections: Mutex::new(Vec::new()),
            ready: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Hold every later dial back by `delay` before it connects.
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.dial_delay.lock().unwrap() = delay;
    }

    fn dial_delay(&self) -> Duration {
        *self.dial_delay.lock().unwrap()
    }

    /// Every connection made to this server, in dial order.
    pub fn connections(&self) -> Vec<Arc<CltPeer>> {
        self.connections.lock().unwrap().clone()
    }

    /// Everything received so far, across connections.
    pub fn received(&self) -> Vec<ToSrvCmd> {
        self.received.lock().unwrap().clone()
    }

    /// Number of player sessions that reached `CltReady`.
    pub fn sessions(&self) -> usize {
        self.ready.lock().unwrap().len()
    }

    /// The `n`th player session, once it reported ready.
    pub async fn session(&self, n: usize) -> Arc<CltPeer> {
        eventually(|| self.sessions() > n).await;
        Arc::clone(&self.ready.lock().unwrap()[n])
    }

    fn accept(self: &Arc<Self>, peer: CltPeer) {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let peer = Arc::new(peer);
        self.connections.lock().unwrap().push(Arc::clone(&peer));
        tokio::spawn(Arc::clone(self).run(peer));
    }

    async fn run(self: Arc<Self>, peer: Arc<CltPeer>) {
        let mut greeted = false;
        loop {
            let cmd = match peer.recv().await {
                Ok(cmd) => cmd,
                Err(PeerError::Closed) => break,
                Err(_) => continue,
            };
            self.received.lock().unwrap().push(cmd.clone());
            if self.script.silent {
                continue;
            }

            match cmd {
                ToSrvCmd::Init(init) if !greeted => {
                    greeted = true;
                    let _ = peer.send(&ToCltCmd::Hello(Hello {
                        serialize_ver: SERIALIZE_VER,
                        proto_ver: PROTO_VER,
                        auth_methods: AuthMethods::FIRST_SRP,
                        username: init.player_name,
                    }));
                }
                ToSrvCmd::FirstSrp(_) => {
                    let _ = peer.send(&ToCltCmd::AcceptAuth(AcceptAuth::default()));
                }
                ToSrvCmd::Init2(_) => {
                    let _ = peer.send(&ToCltCmd::ItemDefs(ItemDefs::default()));
                    let _ = peer.send(&ToCltCmd::NodeDefs(NodeDefs {
                        defs: self
                            .script
                            .nodes
                            .iter()
                            .map(|(id, name)| NodeDef {
                                param0: *id,
                                name: name.clone(),
                                ..Default::default()
                            })
                            .collect(),
                    }));
                    let _ = peer.send(&ToCltCmd::AnnounceMedia(AnnounceMedia {
                        files: self
                            .script
                            .media
                            .iter()
                            .map(|(name, _)| AnnouncedMedia {
                                name: name.clone(),
                                checksum: format!("sum-{name}"),
                            })
                            .collect(),
                        url: self.script.remotes.clone(),
                    }));
                }
                ToSrvCmd::ReqMedia(req) => {
                    let files = self
                        .script
                        .media
                        .iter()
                        .filter(|(name, _)| req.filenames.contains(name))
                        .map(|(name, data)| MediaTransfer {
                            name: name.clone(),
                            data: data.clone(),
                        })
                        .collect();
                    let _ = peer.send(&ToCltCmd::Media(MediaBunch { n: 1, i: 0, files }));
                }
                ToSrvCmd::CltReady(_) => {
                    for cmd in &self.script.on_ready {
                        let _ = peer.send(cmd);
                    }
                    self.ready.lock().unwrap().push(Arc::clone(&peer));
                }
                _ => {}
            }
        }
    }
}

/// Dials fake backends by server name.
#[derive(Default)]
pub struct MemoryDialer {
    servers: HashMap<String, Arc<FakeServer>>,
}

impl MemoryDialer {
    pub fn new(servers: &[Arc<FakeServer>]) -> Self {
        Self {
            servers: servers
                .iter()
                .map(|s| (s.name.clone(), Arc::clone(s)))
                .collect(),
        }
    }
}

impl Dialer for MemoryDialer {
    fn dial<'a>(&'a self, server: &'a ServerDescriptor, _label: String) -> DialFuture<'a> {
        Box::pin(async move {
            let Some(fake) = self.servers.get(&server.name) else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("no fake server {}", server.name),
                ));
            };
            let delay = fake.dial_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let (backend_side, proxy_side) = memory_pair(PeerConfig::default());
            fake.accept(backend_side);
            Ok(proxy_side)
        })
    }
}

pub fn descriptor(name: &str, pool: &str) -> ServerDescriptor {
    ServerDescriptor {
        name: name.to_string(),
        address: format!("memory:{name}"),
        media_pool: pool.to_string(),
        fallbacks: Vec::new(),
        dynamic: false,
    }
}

pub fn settings(default_server: &str) -> LinkSettings {
    LinkSettings {
        handshake_timeout: Duration::from_secs(2),
        init_resend: Duration::from_millis(50),
        default_server: default_server.to_string(),
        probe_user: "probe".to_string(),
    }
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 1,
        jitter: 0.0,
        ..Default::default()
    }
}

/// Multiplex `servers` (name, pool, fake) and return the running proxy.
pub async fn start_proxy(
    servers: Vec<(ServerDescriptor, Arc<FakeServer>)>,
    services: Services,
    settings: LinkSettings,
) -> Result<Proxy, ProxyError> {
    let fakes: Vec<_> = servers.iter().map(|(_, f)| Arc::clone(f)).collect();
    let directory = ServerDirectory::new(servers.into_iter().map(|(d, _)| d).collect());
    let services = Services {
        dialer: Arc::new(MemoryDialer::new(&fakes)),
        ..services
    };
    Proxy::multiplex_with_retry(directory, services, settings, quick_retry()).await
}

/// Poll `cond` until it holds. Panics after [`WAIT`].
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until `name` is no longer registered.
pub async fn wait_until_left(proxy: &Proxy, name: &str) {
    tokio::time::timeout(WAIT, async {
        while proxy.players().contains(name).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("player never left");
}

/// The game client end of a proxy session.
pub struct FakeClient {
    pub peer: SrvPeer,
    pub link: Arc<ClientLink>,
}

impl FakeClient {
    pub fn connect(proxy: &Proxy, label: &str) -> Self {
        let (proxy_side, client_side) = memory_pair(PeerConfig::default());
        let link = proxy.admit(proxy_side, label, None);
        Self {
            peer: client_side,
            link,
        }
    }

    pub fn send(&self, cmd: ToSrvCmd) {
        self.peer.send(&cmd).expect("client send");
    }

    /// Next command from the proxy.
    pub async fn recv(&self) -> Result<ToCltCmd, PeerError> {
        tokio::time::timeout(WAIT, self.peer.recv())
            .await
            .expect("nothing received in time")
    }

    /// Skip commands until one matches.
    pub async fn expect<T>(&self, mut pick: impl FnMut(ToCltCmd) -> Option<T>) -> T {
        loop {
            let cmd = self.recv().await.expect("proxy closed the connection");
            if let Some(found) = pick(cmd) {
                return found;
            }
        }
    }

    pub fn init(&self, name: &str) {
        self.send(ToSrvCmd::Init(Init {
            serialize_ver: SERIALIZE_VER,
            min_proto_ver: PROTO_VER,
            max_proto_ver: PROTO_VER,
            player_name: name.to_string(),
        }));
    }

    /// First login through content delivery, stopping before `CltReady`.
    /// Returns the media announcement.
    pub async fn login(&self, name: &str) -> AnnounceMedia {
        self.init(name);
        let hello = self
            .expect(|cmd| match cmd {
                ToCltCmd::Hello(hello) => Some(hello),
                _ => None,
            })
            .await;
        assert!(hello.auth_methods.contains(AuthMethods::FIRST_SRP));

        self.send(ToSrvCmd::FirstSrp(FirstSrp {
            salt: vec![1; 16],
            verifier: vec![2; 32],
            empty_passwd: false,
        }));
        self.expect(|cmd| matches!(cmd, ToCltCmd::AcceptAuth(_)).then_some(()))
            .await;

        self.send(ToSrvCmd::Init2(Init2 { lang: "en".into() }));
        self.expect(|cmd| matches!(cmd, ToCltCmd::NodeDefs(_)).then_some(()))
            .await;
        self.expect(|cmd| match cmd {
            ToCltCmd::AnnounceMedia(announce) => Some(announce),
            _ => None,
        })
        .await
    }

    /// Full login, attached to whatever server the proxy picks.
    pub async fn join(&self, name: &str) {
        self.login(name).await;
        self.send(ToSrvCmd::CltReady(CltReady {
            version: "5.9.0".into(),
            ..Default::default()
        }));
        let link = Arc::clone(&self.link);
        tokio::time::timeout(WAIT, async move {
            while link.backend().await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client never got attached");
    }

    /// Wait for the proxy to close the connection.
    pub async fn closed(&self) {
        tokio::time::timeout(WAIT, self.peer.closed())
            .await
            .expect("connection still open");
    }
}
