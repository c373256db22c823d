//! Pool-prefixed names for everything that crosses the content boundary.
//!
//! Two servers in different media pools may both define `default:stone` or
//! ship a `heart.png`. Every asset name is therefore rewritten to carry its
//! pool: `rpg_default:stone`, `rpg_heart.png`.
//!
//! A name is split into segments at every run of characters outside
//! `[A-Za-z0-9-_.:]`. Plain names get every segment prefixed. Texture
//! expressions such as `base.png^[brightness:10` only get the segments that
//! look like file names (contain a `.`), so modifiers stay intact.

use voxmux_net::messages::{
    AddParticleSpawner, Alias, AoProps, Hud, HudChange, HudType, Inventory, ItemDef, NodeDef,
    PlaySound,
};

/// Built-in names shared by every server; these are never prefixed.
const DEFAULT_NAMES: [&str; 4] = ["", "air", "unknown", "ignore"];

pub fn is_default_name(name: &str) -> bool {
    DEFAULT_NAMES.contains(&name)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn prepend_raw(prefix: &str, name: &str, texture: bool) -> String {
    if is_default_name(name) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() + prefix.len() + 1);
    let mut rest = name;
    loop {
        let seg_end = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
        let segment = &rest[..seg_end];
        if !texture || segment.contains('.') {
            out.push_str(prefix);
            out.push('_');
        }
        out.push_str(segment);

        rest = &rest[seg_end..];
        if rest.is_empty() {
            break;
        }
        let sep_end = rest.find(is_name_char).unwrap_or(rest.len());
        out.push_str(&rest[..sep_end]);
        rest = &rest[sep_end..];
    }
    out
}

/// Prefix every segment of a plain name.
pub fn prepend(prefix: &str, name: &str) -> String {
    prepend_raw(prefix, name, false)
}

/// Prefix only the file name segments of a texture expression.
pub fn prepend_texture(prefix: &str, name: &str) -> String {
    prepend_raw(prefix, name, true)
}

fn apply(prefix: &str, name: &mut String) {
    *name = prepend(prefix, name);
}

fn apply_texture(prefix: &str, name: &mut String) {
    *name = prepend_texture(prefix, name);
}

pub fn item_def(prefix: &str, def: &mut ItemDef) {
    apply(prefix, &mut def.name);
    apply_texture(prefix, &mut def.inv_img);
    apply_texture(prefix, &mut def.wield_img);
    apply(prefix, &mut def.place_predict);
    apply(prefix, &mut def.place_snd.name);
    apply(prefix, &mut def.place_fail_snd.name);
    apply_texture(prefix, &mut def.palette);
    apply_texture(prefix, &mut def.inv_overlay);
    apply_texture(prefix, &mut def.wield_overlay);
}

pub fn alias(prefix: &str, alias: &mut Alias) {
    apply(prefix, &mut alias.alias);
    apply(prefix, &mut alias.orig);
}

/// Everything except `param0` and `connect_to`, which are remapped by the
/// content multiplexer.
pub fn node_def(prefix: &str, def: &mut NodeDef) {
    apply(prefix, &mut def.name);
    apply(prefix, &mut def.mesh);
    for tile in def
        .tiles
        .iter_mut()
        .chain(def.overlay_tiles.iter_mut())
        .chain(def.special_tiles.iter_mut())
    {
        apply_texture(prefix, &mut tile.texture);
    }
    apply_texture(prefix, &mut def.palette);
    apply(prefix, &mut def.footstep_snd.name);
    apply(prefix, &mut def.digging_snd.name);
    apply(prefix, &mut def.dug_snd.name);
    apply(prefix, &mut def.dig_predict);
}

pub fn inventory(prefix: &str, inv: &mut Inventory) {
    for stack in inv.lists.iter_mut().flat_map(|list| list.stacks.iter_mut()) {
        apply(prefix, &mut stack.name);
    }
}

/// HUD types whose `text` names an image. HUD strings are prefixed as plain
/// names, modifiers included.
fn hud_text_is_image(kind: HudType) -> bool {
    matches!(
        kind,
        HudType::Image | HudType::Statbar | HudType::ImageWaypoint | HudType::Compass
    )
}

pub fn hud(prefix: &str, hud: &mut Hud) {
    if hud.kind == HudType::Statbar {
        apply(prefix, &mut hud.text2);
    }
    if hud_text_is_image(hud.kind) {
        apply(prefix, &mut hud.text);
    }
}

/// `kind` is the type the element was added with.
pub fn hud_change(prefix: &str, kind: HudType, change: &mut HudChange) {
    match change {
        HudChange::Text2(text) if kind == HudType::Statbar => apply(prefix, text),
        HudChange::Text(text) if hud_text_is_image(kind) => apply(prefix, text),
        _ => {}
    }
}

pub fn ao_props(prefix: &str, props: &mut AoProps) {
    for texture in &mut props.textures {
        apply_texture(prefix, texture);
    }
    apply(prefix, &mut props.mesh);
    apply(prefix, &mut props.itemstring);
    apply_texture(prefix, &mut props.dmg_texture_mod);
}

pub fn particle_spawner(prefix: &str, spawner: &mut AddParticleSpawner) {
    apply_texture(prefix, &mut spawner.texture);
}

pub fn sound(prefix: &str, sound: &mut PlaySound) {
    apply(prefix, &mut sound.name);
}
