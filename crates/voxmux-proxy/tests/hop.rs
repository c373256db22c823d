mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{FakeClient, FakeServer, ServerScript, descriptor, eventually, settings, start_proxy};
use voxmux_net::messages::{
    AddHud, AddParticleSpawner, AoAdd, AoId, AoInitData, AoMsg, AoRmAdd, DetachedInv, Hud,
    HudType, Interact, InteractAction, Inventory, KickReason, PlaySound, PlayerListUpdate,
    PointedThing, ToCltCmd, ToSrvCmd, UpdatePlayerList,
};
use voxmux_proxy::{ClientHook, ClientLink, HopError, Services};

fn add(id: AoId, name: &str, is_player: bool, msgs: Vec<AoMsg>) -> AoAdd {
    AoAdd {
        id,
        init_data: AoInitData {
            name: name.into(),
            is_player,
            msgs,
            ..Default::default()
        },
    }
}

fn spawn(adds: Vec<AoAdd>) -> ToCltCmd {
    ToCltCmd::AoRmAdd(AoRmAdd {
        remove: Vec::new(),
        add: adds,
    })
}

fn interact(id: AoId) -> ToSrvCmd {
    ToSrvCmd::Interact(Interact {
        action: InteractAction::Use,
        item_slot: 0,
        pointed: PointedThing::Object { id },
        pos: [0.0; 3],
    })
}

fn pointed_ids(server: &FakeServer) -> Vec<AoId> {
    server
        .received()
        .into_iter()
        .filter_map(|cmd| match cmd {
            ToSrvCmd::Interact(Interact {
                pointed: PointedThing::Object { id },
                ..
            }) => Some(id),
            _ => None,
        })
        .collect()
}

#[derive(Default)]
struct Hops(Mutex<Vec<(String, String)>>);

impl ClientHook for Hops {
    fn on_hop(&self, _client: &ClientLink, source: &str, destination: &str) {
        self.0
            .lock()
            .unwrap()
            .push((source.to_string(), destination.to_string()));
    }
}

#[tokio::test]
async fn test_hop_keeps_the_client_object_id() {
    let lobby = FakeServer::new(
        "lobby",
        ServerScript {
            on_ready: vec![spawn(vec![add(3, "alice", true, Vec::new())])],
            ..Default::default()
        },
    );
    let rpg = FakeServer::new(
        "rpg",
        ServerScript {
            on_ready: vec![spawn(vec![
                add(12, "alice", true, vec![AoMsg::Hp { hp: 20 }]),
                add(3, "pig", false, Vec::new()),
                add(40, "cow", false, Vec::new()),
            ])],
            ..Default::default()
        },
    );
    let services = Services::default();
    let hops = Arc::new(Hops::default());
    services.hooks.register_client_hook(hops.clone()).await;
    let proxy = start_proxy(
        vec![
            (descriptor("lobby", "lobby"), lobby.clone()),
            (descriptor("rpg", "rpg"), rpg.clone()),
        ],
        services,
        settings("lobby"),
    )
    .await
    .unwrap();

    let client = FakeClient::connect(&proxy, "alice");
    client.join("alice").await;
    let first = client
        .expect(|cmd| match cmd {
            ToCltCmd::AoRmAdd(rm_add) => Some(rm_add),
            _ => None,
        })
        .await;
    assert_eq!(first.add.len(), 1);
    assert_eq!(first.add[0].id, 3);

    client.link.hop("rpg").await.unwrap();
    assert_eq!(client.link.server_name().await.as_deref(), Some("rpg"));

    // The avatar is not announced again; the pig that collides with the
    // client's own id shows up under the backend's avatar id instead.
    let second = client
        .expect(|cmd| match cmd {
            ToCltCmd::AoRmAdd(rm_add) if !rm_add.add.is_empty() => Some(rm_add),
            _ => None,
        })
        .await;
    let ids: Vec<AoId> = second.add.iter().map(|a| a.id).collect();
    assert_eq!(ids, [12, 40]);
    assert_eq!(second.add[0].init_data.name, "pig");

    let msgs = client
        .expect(|cmd| match cmd {
            ToCltCmd::AoMsgs(msgs) => Some(msgs),
            _ => None,
        })
        .await;
    assert_eq!(msgs.msgs.len(), 1);
    assert_eq!(msgs.msgs[0].id, 3);
    assert_eq!(msgs.msgs[0].msg, AoMsg::Hp { hp: 20 });

    let pair = client.link.cao().await;
    assert_eq!((pair.player, pair.current), (12, 3));

    client.send(interact(12));
    client.send(interact(3));
    client.send(interact(40));
    eventually(|| pointed_ids(&rpg).len() == 3).await;
    assert_eq!(pointed_ids(&rpg), [3, 12, 40]);

    assert_eq!(
        hops.0.lock().unwrap().clone(),
        [("lobby".to_string(), "rpg".to_string())]
    );
}

#[tokio::test]
async fn test_hop_removes_what_the_old_server_created() {
    let lobby = FakeServer::new(
        "lobby",
        ServerScript {
            on_ready: vec![
                ToCltCmd::AddHud(AddHud {
                    id: 1,
                    hud: Hud {
                        kind: HudType::Text,
                        text: "hello".into(),
                        ..Default::default()
                    },
                }),
                ToCltCmd::AddParticleSpawner(AddParticleSpawner {
                    id: 2,
                    texture: "spark.png".into(),
                    ..Default::default()
                }),
                ToCltCmd::PlaySound(PlaySound {
                    id: 3,
                    name: "wind".into(),
                    looped: true,
                    ..Default::default()
                }),
                ToCltCmd::DetachedInv(DetachedInv {
                    name: "bag".into(),
                    keep: true,
                    inv: Inventory::default(),
                }),
                ToCltCmd::UpdatePlayerList(UpdatePlayerList {
                    kind: PlayerListUpdate::Init,
                    players: vec!["alice".into(), "bob".into()],
                }),
                spawn(vec![add(7, "pig", false, Vec::new())]),
            ],
            ..Default::default()
        },
    );
    let rpg = FakeServer::new(
        "rpg",
        ServerScript {
            on_ready: vec![ToCltCmd::UpdatePlayerList(UpdatePlayerList {
                kind: PlayerListUpdate::Init,
                players: vec!["carol".into()],
            })],
            ..Default::default()
        },
    );
    let proxy = start_proxy(
        vec![
            (descriptor("lobby", "lobby"), lobby.clone()),
            (descriptor("rpg", "rpg"), rpg.clone()),
        ],
        Services::default(),
        settings("lobby"),
    )
    .await
    .unwrap();

    let client = FakeClient::connect(&proxy, "alice");
    client.join("alice").await;
    let hud = client
        .expect(|cmd| match cmd {
            ToCltCmd::AddHud(add) => Some(add.hud),
            _ => None,
        })
        .await;
    assert_eq!(hud.text, "hello");
    client
        .expect(|cmd| matches!(cmd, ToCltCmd::AoRmAdd(_)).then_some(()))
        .await;

    let old = client.link.backend().await.unwrap();
    assert!(!old.resources_empty().await);
    client.link.hop("rpg").await.unwrap();

    let mut removals = Vec::new();
    for _ in 0..6 {
        removals.push(client.recv().await.unwrap());
    }
    assert_eq!(
        removals[0],
        ToCltCmd::AoRmAdd(AoRmAdd {
            remove: vec![7],
            add: Vec::new(),
        })
    );
    assert!(matches!(&removals[1], ToCltCmd::DelParticleSpawner(d) if d.id == 2));
    assert!(matches!(&removals[2], ToCltCmd::StopSound(s) if s.id == 3));
    assert!(matches!(&removals[3], ToCltCmd::RmHud(r) if r.id == 1));
    assert!(matches!(&removals[4], ToCltCmd::DetachedInv(inv) if inv.name == "bag" && !inv.keep));
    assert_eq!(
        removals[5],
        ToCltCmd::UpdatePlayerList(UpdatePlayerList {
            kind: PlayerListUpdate::Remove,
            players: vec!["alice".into(), "bob".into()],
        })
    );
    assert!(old.resources_empty().await);
    assert!(old.is_closed());

    // The client already has a list, so the new server's one is merged in.
    let list = client
        .expect(|cmd| match cmd {
            ToCltCmd::UpdatePlayerList(list) => Some(list),
            _ => None,
        })
        .await;
    assert_eq!(list.kind, PlayerListUpdate::Add);
    assert_eq!(list.players, ["carol"]);
}

#[tokio::test]
async fn test_failed_hop_keeps_the_current_server() {
    let lobby = FakeServer::new("lobby", ServerScript::default());
    let proxy = start_proxy(
        vec![
            (descriptor("lobby", "lobby"), lobby.clone()),
        ],
        Services::default(),
        settings("lobby"),
    )
    .await
    .unwrap();

    let client = FakeClient::connect(&proxy, "alice");
    client.join("alice").await;

    assert!(matches!(
        client.link.hop("lobby").await,
        Err(HopError::AlreadyThere(name)) if name == "lobby"
    ));
    assert!(matches!(
        client.link.hop("nowhere").await,
        Err(HopError::UnknownServer(_))
    ));

    // Known to the directory, but nothing answers.
    proxy.add_server(descriptor("ghost", "lobby")).await.unwrap();
    assert!(matches!(
        client.link.hop("ghost").await,
        Err(HopError::Connect { .. })
    ));
    assert_eq!(client.link.server_name().await.as_deref(), Some("lobby"));
    assert!(!client.link.backend().await.unwrap().is_closed());
}

#[tokio::test]
async fn test_hop_uses_fallback_when_destination_is_down() {
    let lobby = FakeServer::new("lobby", ServerScript::default());
    let backup = FakeServer::new("backup", ServerScript::default());
    let mut down = descriptor("down", "lobby");
    down.fallbacks = vec!["backup".into()];
    let proxy = start_proxy(
        vec![
            (descriptor("lobby", "lobby"), lobby.clone()),
            (descriptor("backup", "lobby"), backup.clone()),
            (down, FakeServer::new("not-down", ServerScript::default())),
        ],
        Services::default(),
        settings("lobby"),
    )
    .await
    .unwrap();

    let client = FakeClient::connect(&proxy, "alice");
    client.join("alice").await;
    client.link.hop("down").await.unwrap();
    assert_eq!(client.link.server_name().await.as_deref(), Some("backup"));
    backup.session(0).await;
}

#[tokio::test]
async fn test_backend_loss_kicks_the_client() {
    let lobby = FakeServer::new("lobby", ServerScript::default());
    let proxy = start_proxy(
        vec![(descriptor("lobby", "lobby"), lobby.clone())],
        Services::default(),
        settings("lobby"),
    )
    .await
    .unwrap();

    let client = FakeClient::connect(&proxy, "alice");
    client.join("alice").await;
    lobby.session(0).await.close();

    let kick = client
        .expect(|cmd| match cmd {
            ToCltCmd::Kick(kick) => Some(kick),
            _ => None,
        })
        .await;
    assert_eq!(kick.reason, KickReason::Custom);
    assert_eq!(kick.custom, "Server connection closed unexpectedly.");
    client.closed().await;
    common::wait_until_left(&proxy, "alice").await;
}

#[tokio::test]
async fn test_hop_abandoned_when_client_leaves_during_dial() {
    let lobby = FakeServer::new("lobby", ServerScript::default());
    let rpg = FakeServer::new("rpg", ServerScript::default());
    let proxy = start_proxy(
        vec![
            (descriptor("lobby", "lobby"), lobby.clone()),
            (descriptor("rpg", "rpg"), rpg.clone()),
        ],
        Services::default(),
        settings("lobby"),
    )
    .await
    .unwrap();
    let probes = rpg.dials();

    let client = FakeClient::connect(&proxy, "alice");
    client.join("alice").await;
    rpg.set_dial_delay(Duration::from_millis(300));

    let link = Arc::clone(&client.link);
    let hop = tokio::spawn(async move { link.hop("rpg").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.peer.close();
    common::wait_until_left(&proxy, "alice").await;

    assert!(matches!(hop.await.unwrap(), Err(HopError::Closed)));
    assert!(client.link.backend().await.is_none());
    assert_eq!(rpg.dials(), probes + 1);
    let dialed = rpg.connections().pop().unwrap();
    eventually(|| dialed.is_closed()).await;
    assert_eq!(rpg.sessions(), 0);
}
