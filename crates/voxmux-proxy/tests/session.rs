mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{
    FakeClient, FakeServer, ServerScript, descriptor, eventually, settings, start_proxy,
    wait_until_left,
};
use voxmux_net::messages::{
    AuthMethods, FirstSrp, Init, KickReason, ModChanJoin, PROTO_VER, SrpBytesA, SrpBytesM, ToCltCmd,
    ToSrvCmd,
};
use voxmux_net::PeerError;
use voxmux_proxy::{
    AuthMath, ClientHook, ClientLink, Credentials, LeaveReason, LinkState, Proxy, Services, SrpAuth,
};

async fn lobby_proxy(services: Services, settings: voxmux_proxy::LinkSettings) -> (Proxy, Arc<FakeServer>) {
    let lobby = FakeServer::new("lobby", ServerScript::default());
    let proxy = start_proxy(vec![(descriptor("lobby", "lobby"), lobby.clone())], services, settings)
        .await
        .unwrap();
    (proxy, lobby)
}

async fn expect_kick(client: &FakeClient) -> voxmux_net::messages::Kick {
    loop {
        match client.recv().await {
            Ok(ToCltCmd::Kick(kick)) => return kick,
            Ok(_) => continue,
            Err(PeerError::Closed) => panic!("closed without a kick"),
            Err(e) => panic!("receive failed: {e}"),
        }
    }
}

#[tokio::test]
async fn test_first_login_attaches_to_default_server() {
    let (proxy, lobby) = lobby_proxy(Services::default(), settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "alice");
    client.join("Alice").await;
    assert_eq!(client.link.name(), Some("Alice"));
    assert_eq!(client.link.state().await, LinkState::Active);
    assert_eq!(client.link.server_name().await.as_deref(), Some("lobby"));
    assert!(proxy.players().contains("Alice").await);

    // The backend hears the client's language and version, not the proxy's.
    lobby.session(0).await;
    let received = lobby.received();
    assert!(received.iter().any(|cmd| matches!(cmd, ToSrvCmd::Init2(init2) if init2.lang == "en")));
    assert!(
        received
            .iter()
            .any(|cmd| matches!(cmd, ToSrvCmd::CltReady(ready) if ready.version == "5.9.0"))
    );
    assert!(
        received
            .iter()
            .any(|cmd| matches!(cmd, ToSrvCmd::FirstSrp(first) if first.empty_passwd))
    );
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let (proxy, _lobby) = lobby_proxy(Services::default(), settings("lobby")).await;

    let first = FakeClient::connect(&proxy, "first");
    first.join("alice").await;

    let second = FakeClient::connect(&proxy, "second");
    second.init("alice");
    assert_eq!(expect_kick(&second).await.reason, KickReason::AlreadyConnected);
    second.closed().await;
    assert!(!first.link.is_closed());
}

#[tokio::test]
async fn test_bad_init_is_kicked_with_reason() {
    let (proxy, _lobby) = lobby_proxy(Services::default(), settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "spaces");
    client.init("bad name");
    assert_eq!(expect_kick(&client).await.reason, KickReason::BadNameChars);

    let client = FakeClient::connect(&proxy, "long");
    client.init(&"x".repeat(21));
    assert_eq!(expect_kick(&client).await.reason, KickReason::BadName);

    let client = FakeClient::connect(&proxy, "old");
    client.send(ToSrvCmd::Init(Init {
        serialize_ver: 28,
        min_proto_ver: PROTO_VER,
        max_proto_ver: PROTO_VER,
        player_name: "alice".into(),
    }));
    assert_eq!(expect_kick(&client).await.reason, KickReason::UnsupportedVer);
    assert!(proxy.players().is_empty().await);
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_handshake_timeout() {
    let mut settings = settings("lobby");
    settings.handshake_timeout = Duration::from_millis(200);
    let (proxy, _lobby) = lobby_proxy(Services::default(), settings).await;

    let client = FakeClient::connect(&proxy, "silent");
    // No kick, the connection just goes away.
    assert!(matches!(client.recv().await, Err(PeerError::Closed)));
    assert!(client.link.is_closed());
}

#[tokio::test]
async fn test_srp_login_with_stored_credentials() {
    let services = Services::default();
    let (salt, verifier) = SrpAuth.new_verifier("bob", b"hunter2");
    services.credentials.set("Bob", Credentials { salt, verifier });
    let (proxy, _lobby) = lobby_proxy(services, settings("lobby")).await;

    let login = |password: &'static [u8], client: FakeClient| async move {
        client.init("bob");
        let hello = client
            .expect(|cmd| match cmd {
                ToCltCmd::Hello(hello) => Some(hello),
                _ => None,
            })
            .await;
        assert_eq!(hello.auth_methods, AuthMethods::SRP);

        let handshake = SrpAuth.initiate();
        client.send(ToSrvCmd::SrpBytesA(SrpBytesA {
            a: handshake.a_pub.clone(),
            no_sha1: true,
        }));
        let salt_b = client
            .expect(|cmd| match cmd {
                ToCltCmd::SrpBytesSaltB(salt_b) => Some(salt_b),
                _ => None,
            })
            .await;
        let proof = SrpAuth
            .complete(&handshake, "bob", password, &salt_b.salt, &salt_b.b)
            .unwrap();
        client.send(ToSrvCmd::SrpBytesM(SrpBytesM { m: proof.proof }));
        client
    };

    let intruder = login(b"wrong", FakeClient::connect(&proxy, "intruder")).await;
    assert_eq!(expect_kick(&intruder).await.reason, KickReason::WrongPasswd);
    intruder.closed().await;
    drop(intruder);
    wait_until_left(&proxy, "bob").await;

    let bob = login(b"hunter2", FakeClient::connect(&proxy, "bob")).await;
    bob.expect(|cmd| matches!(cmd, ToCltCmd::AcceptAuth(_)).then_some(()))
        .await;
    assert_eq!(bob.link.state().await, LinkState::Active);
}

#[tokio::test]
async fn test_unknown_account_cannot_use_srp() {
    let (proxy, _lobby) = lobby_proxy(Services::default(), settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "carol");
    client.init("carol");
    client
        .expect(|cmd| matches!(cmd, ToCltCmd::Hello(_)).then_some(()))
        .await;
    client.send(ToSrvCmd::SrpBytesA(SrpBytesA {
        a: SrpAuth.initiate().a_pub,
        no_sha1: true,
    }));
    assert_eq!(expect_kick(&client).await.reason, KickReason::UnexpectedData);
}

#[tokio::test]
async fn test_sudo_mode_changes_credentials() {
    let services = Services::default();
    let credentials = Arc::clone(&services.credentials);
    let (proxy, _lobby) = lobby_proxy(services, settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "dave");
    client.join("dave").await;
    let stored = credentials.get("dave").unwrap();
    assert_eq!(stored.verifier, vec![2; 32]);

    // The first-login verifier is not a real one, so the proof fails.
    let handshake = SrpAuth.initiate();
    client.send(ToSrvCmd::SrpBytesA(SrpBytesA {
        a: handshake.a_pub.clone(),
        no_sha1: true,
    }));
    client
        .expect(|cmd| matches!(cmd, ToCltCmd::SrpBytesSaltB(_)).then_some(()))
        .await;
    client.send(ToSrvCmd::SrpBytesM(SrpBytesM { m: vec![0; 32] }));
    client
        .expect(|cmd| matches!(cmd, ToCltCmd::DenySudoMode).then_some(()))
        .await;
    assert_eq!(client.link.state().await, LinkState::Active);

    // Now with a real verifier.
    let (salt, verifier) = SrpAuth.new_verifier("dave", b"pw");
    credentials.set("dave", Credentials { salt, verifier });
    let handshake = SrpAuth.initiate();
    client.send(ToSrvCmd::SrpBytesA(SrpBytesA {
        a: handshake.a_pub.clone(),
        no_sha1: true,
    }));
    let salt_b = client
        .expect(|cmd| match cmd {
            ToCltCmd::SrpBytesSaltB(salt_b) => Some(salt_b),
            _ => None,
        })
        .await;
    let proof = SrpAuth
        .complete(&handshake, "dave", b"pw", &salt_b.salt, &salt_b.b)
        .unwrap();
    client.send(ToSrvCmd::SrpBytesM(SrpBytesM { m: proof.proof }));
    client
        .expect(|cmd| matches!(cmd, ToCltCmd::AcceptSudoMode).then_some(()))
        .await;
    assert_eq!(client.link.state().await, LinkState::Sudo);

    client.send(ToSrvCmd::FirstSrp(FirstSrp {
        salt: vec![9; 16],
        verifier: vec![8; 32],
        empty_passwd: false,
    }));
    let link = Arc::clone(&client.link);
    tokio::time::timeout(common::WAIT, async move {
        while link.state().await != LinkState::Active {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(credentials.get("DAVE").unwrap().verifier, vec![8; 32]);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ClientHook for Recorder {
    fn on_state_change(&self, _client: &ClientLink, old: LinkState, new: LinkState) {
        self.events.lock().unwrap().push(format!("{old}->{new}"));
    }

    fn on_leave(&self, client: &ClientLink, reason: &LeaveReason) {
        let reason = match reason {
            LeaveReason::Exit => "exit".to_string(),
            LeaveReason::Kick(kick) => format!("kick {:?}", kick.reason),
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("leave {} {reason}", client.name().unwrap_or_default()));
    }
}

#[tokio::test]
async fn test_hooks_see_state_changes_and_leave() {
    let services = Services::default();
    let recorder = Arc::new(Recorder::default());
    services.hooks.register_client_hook(recorder.clone()).await;
    let (proxy, lobby) = lobby_proxy(services, settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "erin");
    client.join("erin").await;
    lobby.session(0).await;
    client.peer.close();

    eventually(|| recorder.events().iter().any(|e| e.starts_with("leave"))).await;
    let events = recorder.events();
    assert_eq!(
        events,
        ["created->init", "init->active", "leave erin exit"].map(String::from)
    );
    wait_until_left(&proxy, "erin").await;
}

#[tokio::test]
async fn test_mod_channels_are_forwarded_to_the_backend() {
    let (proxy, lobby) = lobby_proxy(Services::default(), settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "finn");
    client.join("finn").await;
    lobby.session(0).await;
    client.send(ToSrvCmd::ModChanJoin(ModChanJoin {
        channel: "chat".into(),
    }));

    eventually(|| {
        lobby
            .received()
            .iter()
            .any(|cmd| matches!(cmd, ToSrvCmd::ModChanJoin(join) if join.channel == "chat"))
    })
    .await;
    assert_eq!(client.link.mod_channels().await, ["chat"]);
}

#[tokio::test]
async fn test_second_srp_start_is_ignored_while_one_is_pending() {
    let services = Services::default();
    let (salt, verifier) = SrpAuth.new_verifier("bob", b"hunter2");
    services.credentials.set("bob", Credentials { salt, verifier });
    let (proxy, _lobby) = lobby_proxy(services, settings("lobby")).await;

    let client = FakeClient::connect(&proxy, "bob");
    client.init("bob");
    client
        .expect(|cmd| matches!(cmd, ToCltCmd::Hello(_)).then_some(()))
        .await;

    let handshake = SrpAuth.initiate();
    client.send(ToSrvCmd::SrpBytesA(SrpBytesA {
        a: handshake.a_pub.clone(),
        no_sha1: true,
    }));
    let salt_b = client
        .expect(|cmd| match cmd {
            ToCltCmd::SrpBytesSaltB(salt_b) => Some(salt_b),
            _ => None,
        })
        .await;

    // A competing attempt gets no challenge of its own.
    client.send(ToSrvCmd::SrpBytesA(SrpBytesA {
        a: SrpAuth.initiate().a_pub,
        no_sha1: true,
    }));
    let proof = SrpAuth
        .complete(&handshake, "bob", b"hunter2", &salt_b.salt, &salt_b.b)
        .unwrap();
    client.send(ToSrvCmd::SrpBytesM(SrpBytesM { m: proof.proof }));

    loop {
        match client.recv().await.unwrap() {
            ToCltCmd::AcceptAuth(_) => break,
            ToCltCmd::SrpBytesSaltB(_) => panic!("second attempt was answered"),
            ToCltCmd::Kick(kick) => panic!("kicked: {:?}", kick.reason),
            _ => {}
        }
    }
    assert_eq!(client.link.state().await, LinkState::Active);
}

#[tokio::test]
async fn test_old_backend_closing_leaves_the_next_session_alone() {
    let (proxy, lobby) = lobby_proxy(Services::default(), settings("lobby")).await;

    let first = FakeClient::connect(&proxy, "first");
    first.join("alice").await;
    let old_backend = lobby.session(0).await;
    first.peer.close();
    wait_until_left(&proxy, "alice").await;
    drop(first);

    let second = FakeClient::connect(&proxy, "second");
    second.join("alice").await;
    lobby.session(1).await;

    // The first session's backend goes away only now.
    old_backend.close();
    eventually(|| old_backend.is_closed()).await;
    let kicked = tokio::time::timeout(
        Duration::from_millis(300),
        second.expect(|cmd| matches!(cmd, ToCltCmd::Kick(_)).then_some(())),
    )
    .await;
    assert!(kicked.is_err());
    assert!(!second.link.is_closed());
    assert!(proxy.players().contains("alice").await);
    assert_eq!(second.link.server_name().await.as_deref(), Some("lobby"));
}
