//! Per-command rewriting between a backend and its client.
//!
//! Everything a backend sends is translated into the merged namespace:
//! content ids become global, asset names get the pool prefix and object
//! ids are swapped. Along the way every server-scoped resource the client
//! is told about is recorded in [`ServerResources`], so a hop can take it
//! all away again.

use std::collections::{HashMap, HashSet};

use voxmux_net::messages::{
    AoId, AoRmAdd, DelParticleSpawner, DetachedInv, HudId, HudType, Interact, Inventory,
    ParticleSpawnerId, PlayerListUpdate, PointedThing, RmHud, SoundId, StopSound, ToCltCmd,
    UpdatePlayerList,
};

use crate::activeobject::{self, CaoPair, CaoState};
use crate::content::GlobalContent;
use crate::namespace;

/// What one backend has created on the client.
#[derive(Debug, Default)]
pub struct ServerResources {
    pub aos: HashSet<AoId>,
    pub particle_spawners: HashSet<ParticleSpawnerId>,
    pub sounds: HashSet<SoundId>,
    pub huds: HashMap<HudId, HudType>,
    pub detached_invs: Vec<String>,
    pub player_list: HashSet<String>,
}

impl ServerResources {
    pub fn is_empty(&self) -> bool {
        self.aos.is_empty()
            && self.particle_spawners.is_empty()
            && self.sounds.is_empty()
            && self.huds.is_empty()
            && self.detached_invs.is_empty()
            && self.player_list.is_empty()
    }

    /// Commands that make the client forget everything, emptying the sets.
    /// Object ids are translated with `pair`.
    pub fn drain_removals(&mut self, pair: &CaoPair) -> Vec<ToCltCmd> {
        let mut cmds = Vec::new();

        if !self.aos.is_empty() {
            let mut remove: Vec<AoId> = self.aos.drain().map(|id| pair.swap(id)).collect();
            remove.sort_unstable();
            cmds.push(ToCltCmd::AoRmAdd(AoRmAdd {
                remove,
                add: Vec::new(),
            }));
        }

        let mut spawners: Vec<_> = self.particle_spawners.drain().collect();
        spawners.sort_unstable();
        cmds.extend(
            spawners
                .into_iter()
                .map(|id| ToCltCmd::DelParticleSpawner(DelParticleSpawner { id })),
        );

        let mut sounds: Vec<_> = self.sounds.drain().collect();
        sounds.sort_unstable();
        cmds.extend(sounds.into_iter().map(|id| ToCltCmd::StopSound(StopSound { id })));

        let mut huds: Vec<_> = self.huds.drain().map(|(id, _)| id).collect();
        huds.sort_unstable();
        cmds.extend(huds.into_iter().map(|id| ToCltCmd::RmHud(RmHud { id })));

        cmds.extend(self.detached_invs.drain(..).map(|name| {
            ToCltCmd::DetachedInv(DetachedInv {
                name,
                keep: false,
                inv: Inventory::default(),
            })
        }));

        if !self.player_list.is_empty() {
            let mut players: Vec<_> = self.player_list.drain().collect();
            players.sort();
            cmds.push(ToCltCmd::UpdatePlayerList(UpdatePlayerList {
                kind: PlayerListUpdate::Remove,
                players,
            }));
        }

        cmds
    }
}

/// Inputs for rewriting one command towards the client.
pub struct ToClient<'a> {
    pub content: &'a GlobalContent,
    pub pool: &'a str,
    pub player_name: &'a str,
    pub cao: &'a mut CaoState,
    pub resources: &'a mut ServerResources,
    /// Whether the client already received a full player list.
    pub player_list_seen: &'a mut bool,
}

/// Rewrite a command from the backend. Returns what to send to the client,
/// possibly nothing.
pub fn to_client(ctx: ToClient<'_>, cmd: ToCltCmd) -> Vec<ToCltCmd> {
    let ToClient {
        content,
        pool,
        player_name,
        cao,
        resources,
        player_list_seen,
    } = ctx;

    let cmd = match cmd {
        ToCltCmd::AddNode(mut add) => {
            add.node.param0 = content.to_global(pool, add.node.param0);
            ToCltCmd::AddNode(add)
        }
        ToCltCmd::BlkData(mut blk) => {
            for node in &mut blk.nodes {
                node.param0 = content.to_global(pool, node.param0);
            }
            ToCltCmd::BlkData(blk)
        }
        ToCltCmd::AoRmAdd(rm_add) => {
            return activeobject::rewrite_rm_add(cao, player_name, pool, rm_add, &mut resources.aos);
        }
        ToCltCmd::AoMsgs(mut msgs) => {
            activeobject::rewrite_ao_msgs(&cao.pair, pool, &mut msgs);
            ToCltCmd::AoMsgs(msgs)
        }
        ToCltCmd::AddHud(mut add) => {
            resources.huds.insert(add.id, add.hud.kind);
            namespace::hud(pool, &mut add.hud);
            ToCltCmd::AddHud(add)
        }
        ToCltCmd::ChangeHud(mut change) => {
            if let Some(&kind) = resources.huds.get(&change.id) {
                namespace::hud_change(pool, kind, &mut change.change);
            }
            ToCltCmd::ChangeHud(change)
        }
        ToCltCmd::RmHud(rm) => {
            resources.huds.remove(&rm.id);
            ToCltCmd::RmHud(rm)
        }
        ToCltCmd::AddParticleSpawner(mut spawner) => {
            resources.particle_spawners.insert(spawner.id);
            namespace::particle_spawner(pool, &mut spawner);
            if spawner.attached_ao_id != 0 {
                spawner.attached_ao_id = cao.pair.swap(spawner.attached_ao_id);
            }
            ToCltCmd::AddParticleSpawner(spawner)
        }
        ToCltCmd::DelParticleSpawner(del) => {
            resources.particle_spawners.remove(&del.id);
            ToCltCmd::DelParticleSpawner(del)
        }
        ToCltCmd::PlaySound(mut sound) => {
            if !sound.ephemeral {
                resources.sounds.insert(sound.id);
            }
            namespace::sound(pool, &mut sound);
            if sound.src_ao_id != 0 {
                sound.src_ao_id = cao.pair.swap(sound.src_ao_id);
            }
            ToCltCmd::PlaySound(sound)
        }
        ToCltCmd::StopSound(stop) => {
            resources.sounds.remove(&stop.id);
            ToCltCmd::StopSound(stop)
        }
        ToCltCmd::DetachedInv(mut inv) => {
            if inv.keep {
                if !resources.detached_invs.contains(&inv.name) {
                    resources.detached_invs.push(inv.name.clone());
                }
            } else {
                resources.detached_invs.retain(|name| *name != inv.name);
            }
            namespace::inventory(pool, &mut inv.inv);
            ToCltCmd::DetachedInv(inv)
        }
        ToCltCmd::Inv(mut update) => {
            namespace::inventory(pool, &mut update.inv);
            ToCltCmd::Inv(update)
        }
        ToCltCmd::UpdatePlayerList(mut list) => {
            match list.kind {
                PlayerListUpdate::Init => {
                    if *player_list_seen {
                        list.kind = PlayerListUpdate::Add;
                    }
                    *player_list_seen = true;
                    resources.player_list.extend(list.players.iter().cloned());
                }
                PlayerListUpdate::Add => resources.player_list.extend(list.players.iter().cloned()),
                PlayerListUpdate::Remove => {
                    for player in &list.players {
                        resources.player_list.remove(player);
                    }
                }
            }
            ToCltCmd::UpdatePlayerList(list)
        }
        other => other,
    };
    vec![cmd]
}

/// Rewrite a client interaction for the backend.
pub fn interact_to_server(pair: &CaoPair, interact: &mut Interact) {
    if let PointedThing::Object { id } = &mut interact.pointed {
        *id = pair.swap(*id);
    }
}
