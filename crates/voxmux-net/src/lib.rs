//! Transport for the voxmux proxy: length-prefixed framing, packet kinds with
//! optional compression, the typed command vocabulary spoken between clients
//! and servers, and [`Peer`] connections built on top of them.

pub mod framing;
pub mod listener;
pub mod messages;
pub mod packet;
pub mod peer;
pub mod socket;

pub use framing::{FrameConfig, FrameError};
pub use listener::{Accepted, ClientSlot, ConnectionId, IdGenerator, Listener, ListenerConfig};
pub use messages::{MessageError, ToCltCmd, ToSrvCmd};
pub use packet::{CompressionConfig, PacketError};
pub use peer::{Ack, CloseReason, CltPeer, Peer, PeerConfig, PeerError, SrvPeer, memory_pair};
pub use socket::{SocketConfig, configure_stream, create_listener, dial};
