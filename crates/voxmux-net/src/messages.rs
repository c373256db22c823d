//! Wire vocabulary and message serialization.
//!
//! Commands travelling towards a server are [`ToSrvCmd`], commands travelling
//! towards a client are [`ToCltCmd`]. The proxy speaks both dialects: it is
//! a server to the real client and a client to every backend.
//!
//! Messages are serialized with [`postcard`] and prefixed with a protocol
//! version byte. Use [`encode`] and [`decode`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Serialization format version negotiated in the handshake.
pub const SERIALIZE_VER: u8 = 29;

/// Game protocol version negotiated in the handshake.
pub const PROTO_VER: u16 = 41;

/// Numeric node-type id ("param0").
pub type Content = u16;

/// Active object id, assigned by whichever server owns the object.
pub type AoId = u16;

/// Server-assigned HUD element id.
pub type HudId = u32;
/// Server-assigned sound handle.
pub type SoundId = i32;
/// Server-assigned particle spawner id.
pub type ParticleSpawnerId = u32;

/// Content id of nodes whose definition is unknown to the receiver.
pub const CONTENT_UNKNOWN: Content = 125;
/// Content id of air.
pub const CONTENT_AIR: Content = 126;
/// Content id of the "not loaded" placeholder.
pub const CONTENT_IGNORE: Content = 127;

/// Returns `true` for the three content ids every server shares.
pub fn is_sentinel_content(id: Content) -> bool {
    (CONTENT_UNKNOWN..=CONTENT_IGNORE).contains(&id)
}

bitflags::bitflags! {
    /// Bit set of authentication mechanisms offered in [`Hello`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AuthMethods: u8 {
        /// Regular SRP login with an existing verifier.
        const SRP = 1 << 1;
        /// First login: the client registers salt and verifier.
        const FIRST_SRP = 1 << 2;
    }
}

impl Default for AuthMethods {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Commands towards a server
// ---------------------------------------------------------------------------

/// Everything a client sends to a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ToSrvCmd {
    // --- Handshake ---
    Init(Init),
    Init2(Init2),
    FirstSrp(FirstSrp),
    SrpBytesA(SrpBytesA),
    SrpBytesM(SrpBytesM),
    ReqMedia(ReqMedia),
    CltReady(CltReady),

    // --- Gameplay ---
    Interact(Interact),
    PlayerPos(PlayerPos),
    GotBlks(GotBlks),
    ChatMsg(ChatMsgToSrv),

    // --- Mod channels ---
    ModChanJoin(ModChanJoin),
    ModChanLeave(ModChanLeave),
    ModChanMsg(ModChanMsgToSrv),
}

/// First packet of a client: versions and player name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Init {
    pub serialize_ver: u8,
    pub min_proto_ver: u16,
    pub max_proto_ver: u16,
    pub player_name: String,
}

/// Sent after authentication succeeded; asks for definitions and media.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Init2 {
    pub lang: String,
}

/// Registers a new account (salt + verifier).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirstSrp {
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
    pub empty_passwd: bool,
}

/// Client's public ephemeral value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SrpBytesA {
    pub a: Vec<u8>,
    pub no_sha1: bool,
}

/// Client's proof.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SrpBytesM {
    pub m: Vec<u8>,
}

/// Media files the client still needs, by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReqMedia {
    pub filenames: Vec<String>,
}

/// Client version information, sent once media loading finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CltReady {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub reserved: u8,
    pub version: String,
    pub formspec: u16,
}

/// What an [`Interact`] does with the pointed thing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InteractAction {
    Dig,
    StopDigging,
    Dug,
    Place,
    Use,
    Activate,
}

/// What the player is pointing at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PointedThing {
    Nothing,
    Node { under: [i16; 3], above: [i16; 3] },
    Object { id: AoId },
}

/// The player used, dug or placed something.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interact {
    pub action: InteractAction,
    pub item_slot: u16,
    pub pointed: PointedThing,
    pub pos: [f32; 3],
}

/// Periodic player movement update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerPos {
    pub pos: [f32; 3],
    pub vel: [f32; 3],
    pub pitch: f32,
    pub yaw: f32,
    pub keys: u32,
}

/// Map blocks the client acknowledges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GotBlks {
    pub blocks: Vec<[i16; 3]>,
}

/// A chat line typed by the player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMsgToSrv {
    pub msg: String,
}

/// Subscribe to a mod channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModChanJoin {
    pub channel: String,
}

/// Unsubscribe from a mod channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModChanLeave {
    pub channel: String,
}

/// A message on a joined mod channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModChanMsgToSrv {
    pub channel: String,
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Commands towards a client
// ---------------------------------------------------------------------------

/// Everything a server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ToCltCmd {
    // --- Handshake ---
    Hello(Hello),
    SrpBytesSaltB(SrpBytesSaltB),
    AcceptAuth(AcceptAuth),
    AcceptSudoMode,
    DenySudoMode,
    Kick(Kick),

    // --- Content ---
    ItemDefs(ItemDefs),
    NodeDefs(NodeDefs),
    AnnounceMedia(AnnounceMedia),
    Media(MediaBunch),

    // --- Active objects ---
    AoRmAdd(AoRmAdd),
    AoMsgs(AoMsgs),

    // --- Server-scoped resources ---
    AddHud(AddHud),
    ChangeHud(ChangeHud),
    RmHud(RmHud),
    AddParticleSpawner(AddParticleSpawner),
    DelParticleSpawner(DelParticleSpawner),
    PlaySound(PlaySound),
    StopSound(StopSound),
    DetachedInv(DetachedInv),
    Inv(InvUpdate),
    UpdatePlayerList(UpdatePlayerList),

    // --- World ---
    AddNode(AddNode),
    BlkData(BlkData),
    ChatMsg(ChatMsg),
    ModChanMsg(ModChanMsg),
}

/// Server's answer to [`Init`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hello {
    pub serialize_ver: u8,
    pub proto_ver: u16,
    pub auth_methods: AuthMethods,
    pub username: String,
}

/// Server half of an SRP exchange: salt and `B`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SrpBytesSaltB {
    pub salt: Vec<u8>,
    pub b: Vec<u8>,
}

/// Login succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptAuth {
    pub player_pos: [f32; 3],
    pub map_seed: u64,
    pub send_interval: f32,
    pub sudo_auth_methods: AuthMethods,
}

impl Default for AcceptAuth {
    fn default() -> Self {
        Self {
            player_pos: [0.0; 3],
            map_seed: 0,
            send_interval: 0.09,
            sudo_auth_methods: AuthMethods::SRP,
        }
    }
}

/// Why a client was disconnected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KickReason {
    WrongPasswd,
    UnexpectedData,
    UnsupportedVer,
    BadNameChars,
    BadName,
    TooManyClts,
    EmptyPasswd,
    AlreadyConnected,
    SrvErr,
    Custom,
    Shutdown,
    Crash,
}

/// Disconnects the client with a reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kick {
    pub reason: KickReason,
    /// Free text, only meaningful for [`KickReason::Custom`].
    pub custom: String,
    pub reconnect: bool,
}

impl Kick {
    /// Kick with a typed reason and no text.
    pub fn new(reason: KickReason) -> Self {
        Self {
            reason,
            custom: String::new(),
            reconnect: false,
        }
    }

    /// Kick with free text.
    pub fn custom(text: impl Into<String>) -> Self {
        Self {
            reason: KickReason::Custom,
            custom: text.into(),
            reconnect: false,
        }
    }
}

/// A named item or node group with its rating.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub name: String,
    pub rating: i16,
}

/// Sound reference inside a definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SoundDef {
    pub name: String,
    pub gain: f32,
    pub pitch: f32,
    pub fade: f32,
}

/// Broad item category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemKind {
    #[default]
    None,
    Node,
    Craft,
    Tool,
}

/// Digging capabilities of a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCaps {
    pub punch_interval: f32,
    pub max_drop_level: i16,
    pub damage_groups: Vec<Group>,
}

/// One item definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemDef {
    pub kind: ItemKind,
    pub name: String,
    pub desc: String,
    pub inv_img: String,
    pub wield_img: String,
    pub wield_scale: [f32; 3],
    pub stack_max: u16,
    pub usable: bool,
    pub can_point_liquids: bool,
    pub tool_caps: Option<ToolCaps>,
    pub groups: Vec<Group>,
    pub place_predict: String,
    pub place_snd: SoundDef,
    pub place_fail_snd: SoundDef,
    pub point_range: f32,
    pub palette: String,
    pub color: [u8; 4],
    pub inv_overlay: String,
    pub wield_overlay: String,
}

impl ItemDef {
    /// The bare hand every player holds when the wield slot is empty.
    pub fn hand() -> Self {
        Self {
            kind: ItemKind::Tool,
            inv_img: "wieldhand.png".to_string(),
            wield_scale: [1.0, 1.0, 1.0],
            stack_max: 1,
            tool_caps: Some(ToolCaps::default()),
            point_range: 4.0,
            ..Default::default()
        }
    }
}

/// Maps an old item name to a current one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Alias {
    pub alias: String,
    pub orig: String,
}

/// The complete item definition set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemDefs {
    pub defs: Vec<ItemDef>,
    pub aliases: Vec<Alias>,
}

/// How a node is rendered.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DrawType {
    #[default]
    Normal,
    AirLike,
    Liquid,
    FlowingLiquid,
    GlassLike,
    AllFaces,
    TorchLike,
    PlantLike,
    FenceLike,
    NodeBox,
    Mesh,
}

/// One face texture of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TileDef {
    pub texture: String,
    pub backface_culling: bool,
    pub scale: u8,
}

/// One node definition; `param0` is its content id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeDef {
    pub param0: Content,
    pub name: String,
    pub groups: Vec<Group>,
    pub draw_type: DrawType,
    pub mesh: String,
    pub visual_scale: f32,
    pub tiles: Vec<TileDef>,
    pub overlay_tiles: Vec<TileDef>,
    pub special_tiles: Vec<TileDef>,
    pub color: [u8; 4],
    pub palette: String,
    pub connect_sides: u8,
    /// Content ids this node visually connects to.
    pub connect_to: Vec<Content>,
    pub walkable: bool,
    pub pointable: bool,
    pub diggable: bool,
    pub light_source: u8,
    pub footstep_snd: SoundDef,
    pub digging_snd: SoundDef,
    pub dug_snd: SoundDef,
    pub dig_predict: String,
}

/// The complete node definition set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeDefs {
    pub defs: Vec<NodeDef>,
}

/// A media file name with its checksum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnouncedMedia {
    pub name: String,
    /// Base64 SHA-1 of the file content.
    pub checksum: String,
}

/// Media the server offers, plus remote fetch URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnounceMedia {
    pub files: Vec<AnnouncedMedia>,
    /// Comma-separated remote media servers.
    pub url: String,
}

/// One media file and its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaTransfer {
    pub name: String,
    pub data: Vec<u8>,
}

/// One bunch of a media transfer: bunch `i` of `n`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaBunch {
    pub n: u16,
    pub i: u16,
    pub files: Vec<MediaTransfer>,
}

/// Visual properties of an active object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AoProps {
    pub max_hp: u16,
    pub visual: String,
    pub mesh: String,
    pub textures: Vec<String>,
    pub itemstring: String,
    pub dmg_texture_mod: String,
    pub nametag: String,
}

/// Attaches an active object to a parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AoAttach {
    pub parent_id: AoId,
    pub bone: String,
    pub pos: [f32; 3],
    pub rot: [f32; 3],
    pub force_visible: bool,
}

/// A message addressed to one active object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AoMsg {
    Props(AoProps),
    Pos {
        pos: [f32; 3],
        vel: [f32; 3],
        rot: [f32; 3],
        interpolate: bool,
    },
    TextureMod {
        modifier: String,
    },
    Attach(AoAttach),
    SpawnInfant {
        id: AoId,
        kind: u8,
    },
    Hp {
        hp: u16,
    },
    ArmorGroups {
        armor: Vec<Group>,
    },
}

/// Initial state of an added active object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AoInitData {
    pub name: String,
    pub is_player: bool,
    pub pos: [f32; 3],
    pub rot: [f32; 3],
    pub hp: u16,
    pub msgs: Vec<AoMsg>,
}

/// An active object entering the client's view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AoAdd {
    pub id: AoId,
    pub init_data: AoInitData,
}

/// Active objects removed and added in one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AoRmAdd {
    pub remove: Vec<AoId>,
    pub add: Vec<AoAdd>,
}

/// An [`AoMsg`] with its target object id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdAoMsg {
    pub id: AoId,
    pub msg: AoMsg,
}

/// A batch of active-object messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AoMsgs {
    pub msgs: Vec<IdAoMsg>,
}

/// Kind of HUD element.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HudType {
    #[default]
    Image,
    Text,
    Statbar,
    Inventory,
    Waypoint,
    ImageWaypoint,
    Compass,
    Minimap,
}

/// A HUD element.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Hud {
    pub kind: HudType,
    pub pos: [f32; 2],
    pub name: String,
    pub scale: [f32; 2],
    pub text: String,
    pub number: u32,
    pub item: u32,
    pub dir: u32,
    pub align: [f32; 2],
    pub offset: [f32; 2],
    pub world_pos: [f32; 3],
    pub size: [i32; 2],
    pub z_index: i16,
    pub text2: String,
}

/// Show a new HUD element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddHud {
    pub id: HudId,
    pub hud: Hud,
}

/// A single-field HUD update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HudChange {
    Pos([f32; 2]),
    Name(String),
    Scale([f32; 2]),
    Text(String),
    Number(u32),
    Item(u32),
    Dir(u32),
    Align([f32; 2]),
    Offset([f32; 2]),
    WorldPos([f32; 3]),
    Size([i32; 2]),
    ZIndex(i16),
    Text2(String),
}

/// Update one field of a HUD element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeHud {
    pub id: HudId,
    pub change: HudChange,
}

/// Remove a HUD element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RmHud {
    pub id: HudId,
}

/// Start a particle spawner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddParticleSpawner {
    pub id: ParticleSpawnerId,
    pub amount: u16,
    pub time: f32,
    pub texture: String,
    pub glow: u8,
    /// Object the spawner follows, 0 when free-standing.
    pub attached_ao_id: AoId,
}

/// Stop a particle spawner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelParticleSpawner {
    pub id: ParticleSpawnerId,
}

/// Start playing a sound.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaySound {
    pub id: SoundId,
    pub name: String,
    pub gain: f32,
    pub pitch: f32,
    pub pos: [f32; 3],
    /// Object the sound follows, 0 when positional or global.
    pub src_ao_id: AoId,
    pub looped: bool,
    /// Fire-and-forget sounds cannot be stopped and are not tracked.
    pub ephemeral: bool,
}

/// Stop a playing sound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopSound {
    pub id: SoundId,
}

/// A stack of items in one inventory slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemStack {
    pub name: String,
    pub count: u16,
    pub wear: u16,
}

/// A named list of inventory slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvList {
    pub name: String,
    pub width: u16,
    pub stacks: Vec<ItemStack>,
}

/// A full inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub lists: Vec<InvList>,
}

/// Create, update or drop (`keep == false`) a detached inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetachedInv {
    pub name: String,
    /// `false` removes the inventory on the client.
    pub keep: bool,
    pub inv: Inventory,
}

/// The player's own inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvUpdate {
    pub inv: Inventory,
}

/// How an [`UpdatePlayerList`] changes the list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlayerListUpdate {
    Init,
    Add,
    Remove,
}

/// Changes the client's list of online players.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdatePlayerList {
    pub kind: PlayerListUpdate,
    pub players: Vec<String>,
}

/// A single map node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub param0: Content,
    pub param1: u8,
    pub param2: u8,
}

/// Set one node in the world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddNode {
    pub pos: [i16; 3],
    pub node: Node,
    pub keep_meta: bool,
}

/// Node contents of one map block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlkData {
    pub pos: [i16; 3],
    pub nodes: Vec<Node>,
}

/// A chat line shown to the player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMsg {
    pub sender: String,
    pub text: String,
}

/// A message on a mod channel the client joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModChanMsg {
    pub channel: String,
    pub sender: String,
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Tags for logging
// ---------------------------------------------------------------------------

impl ToSrvCmd {
    /// Short name of the command, for log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            ToSrvCmd::Init(_) => "Init",
            ToSrvCmd::Init2(_) => "Init2",
            ToSrvCmd::FirstSrp(_) => "FirstSrp",
            ToSrvCmd::SrpBytesA(_) => "SrpBytesA",
            ToSrvCmd::SrpBytesM(_) => "SrpBytesM",
            ToSrvCmd::ReqMedia(_) => "ReqMedia",
            ToSrvCmd::CltReady(_) => "CltReady",
            ToSrvCmd::Interact(_) => "Interact",
            ToSrvCmd::PlayerPos(_) => "PlayerPos",
            ToSrvCmd::GotBlks(_) => "GotBlks",
            ToSrvCmd::ChatMsg(_) => "ChatMsg",
            ToSrvCmd::ModChanJoin(_) => "ModChanJoin",
            ToSrvCmd::ModChanLeave(_) => "ModChanLeave",
            ToSrvCmd::ModChanMsg(_) => "ModChanMsg",
        }
    }
}

impl ToCltCmd {
    /// Short name of the command, for log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            ToCltCmd::Hello(_) => "Hello",
            ToCltCmd::SrpBytesSaltB(_) => "SrpBytesSaltB",
            ToCltCmd::AcceptAuth(_) => "AcceptAuth",
            ToCltCmd::AcceptSudoMode => "AcceptSudoMode",
            ToCltCmd::DenySudoMode => "DenySudoMode",
            ToCltCmd::Kick(_) => "Kick",
            ToCltCmd::ItemDefs(_) => "ItemDefs",
            ToCltCmd::NodeDefs(_) => "NodeDefs",
            ToCltCmd::AnnounceMedia(_) => "AnnounceMedia",
            ToCltCmd::Media(_) => "Media",
            ToCltCmd::AoRmAdd(_) => "AoRmAdd",
            ToCltCmd::AoMsgs(_) => "AoMsgs",
            ToCltCmd::AddHud(_) => "AddHud",
            ToCltCmd::ChangeHud(_) => "ChangeHud",
            ToCltCmd::RmHud(_) => "RmHud",
            ToCltCmd::AddParticleSpawner(_) => "AddParticleSpawner",
            ToCltCmd::DelParticleSpawner(_) => "DelParticleSpawner",
            ToCltCmd::PlaySound(_) => "PlaySound",
            ToCltCmd::StopSound(_) => "StopSound",
            ToCltCmd::DetachedInv(_) => "DetachedInv",
            ToCltCmd::Inv(_) => "Inv",
            ToCltCmd::UpdatePlayerList(_) => "UpdatePlayerList",
            ToCltCmd::AddNode(_) => "AddNode",
            ToCltCmd::BlkData(_) => "BlkData",
            ToCltCmd::ChatMsg(_) => "ChatMsg",
            ToCltCmd::ModChanMsg(_) => "ModChanMsg",
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Failure to encode or decode a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("empty message, no version byte")]
    EmptyPayload,

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("deserialization error: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Serialize a command into a versioned binary message.
///
/// Wire format: `[version: u8] [postcard-encoded command]`
pub fn encode<T: Serialize>(cmd: &T) -> Result<Vec<u8>, postcard::Error> {
    let body = postcard::to_allocvec(cmd)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary message.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, MessageError> {
    let Some((&version, body)) = data.split_first() else {
        return Err(MessageError::EmptyPayload);
    };
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
