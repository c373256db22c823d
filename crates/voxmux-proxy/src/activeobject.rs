//! Keeping the client's own object id stable across hops.
//!
//! Every backend assigns its own id to the player's avatar. The client only
//! ever learns one of them, the id from the first backend (`current`). While
//! attached to a later backend, its id for the avatar (`player`) and
//! `current` are exchanged in every object id that crosses the proxy.

use std::collections::HashSet;

use voxmux_net::messages::{AoId, AoMsg, AoMsgs, AoRmAdd, IdAoMsg, ToCltCmd};

use crate::namespace;

/// The two ids of the player's avatar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaoPair {
    /// Id assigned by the attached backend.
    pub player: AoId,
    /// Id the client believes is its own.
    pub current: AoId,
}

impl CaoPair {
    /// Exchange `player` and `current`, leave every other id alone.
    pub fn swap(&self, id: AoId) -> AoId {
        if id == self.player {
            self.current
        } else if id == self.current {
            self.player
        } else {
            id
        }
    }
}

/// Per-session avatar bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct CaoState {
    pub pair: CaoPair,
    /// Set once the first backend announced the avatar.
    pub fixed: bool,
}

impl CaoState {
    /// Forget the detached backend's avatar id.
    pub fn detach(&mut self) {
        self.pair.player = self.pair.current;
    }
}

/// Rewrite one object message in place.
pub fn rewrite_ao_msg(pair: &CaoPair, pool: &str, msg: &mut AoMsg) {
    match msg {
        AoMsg::Props(props) => namespace::ao_props(pool, props),
        AoMsg::TextureMod { modifier } => *modifier = namespace::prepend_texture(pool, modifier),
        AoMsg::Attach(attach) => attach.parent_id = pair.swap(attach.parent_id),
        AoMsg::SpawnInfant { id, .. } => *id = pair.swap(*id),
        AoMsg::Pos { .. } | AoMsg::Hp { .. } | AoMsg::ArmorGroups { .. } => {}
    }
}

pub fn rewrite_ao_msgs(pair: &CaoPair, pool: &str, msgs: &mut AoMsgs) {
    for IdAoMsg { id, msg } in &mut msgs.msgs {
        *id = pair.swap(*id);
        rewrite_ao_msg(pair, pool, msg);
    }
}

/// Rewrite an object remove/add for the client.
///
/// The avatar is recognised by name. Its first announcement fixes the
/// client-facing id and is forwarded; later ones only update `player`,
/// and their init messages are forwarded as messages to `current`. Removal
/// of the avatar is never forwarded. Other objects are tracked in `live` so
/// they can be removed on detach.
pub fn rewrite_rm_add(
    cao: &mut CaoState,
    player_name: &str,
    pool: &str,
    cmd: AoRmAdd,
    live: &mut HashSet<AoId>,
) -> Vec<ToCltCmd> {
    let mut forward = AoRmAdd::default();
    let mut avatar_msgs = AoMsgs::default();

    for id in cmd.remove {
        if id == cao.pair.player {
            continue;
        }
        live.remove(&id);
        forward.remove.push(cao.pair.swap(id));
    }

    for mut add in cmd.add {
        if add.init_data.name == player_name {
            cao.pair.player = add.id;
            if !cao.fixed {
                cao.pair.current = add.id;
                cao.fixed = true;
                for msg in &mut add.init_data.msgs {
                    rewrite_ao_msg(&cao.pair, pool, msg);
                }
                forward.add.push(add);
            } else {
                for mut msg in add.init_data.msgs {
                    rewrite_ao_msg(&cao.pair, pool, &mut msg);
                    avatar_msgs.msgs.push(IdAoMsg {
                        id: cao.pair.current,
                        msg,
                    });
                }
            }
            continue;
        }

        live.insert(add.id);
        add.id = cao.pair.swap(add.id);
        for msg in &mut add.init_data.msgs {
            rewrite_ao_msg(&cao.pair, pool, msg);
        }
        forward.add.push(add);
    }

    let mut out = Vec::new();
    if !forward.remove.is_empty() || !forward.add.is_empty() {
        out.push(ToCltCmd::AoRmAdd(forward));
    }
    if !avatar_msgs.msgs.is_empty() {
        out.push(ToCltCmd::AoMsgs(avatar_msgs));
    }
    out
}
