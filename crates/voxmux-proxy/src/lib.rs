//! Core of the voxmux proxy.
//!
//! Several backend servers are presented to game clients as one. At startup
//! every media pool is probed and the content of all pools is merged into a
//! single namespace ([`content`]). Clients then log in to the proxy itself
//! ([`client`]) and get attached to a backend ([`backend`]), whose traffic is
//! rewritten into the merged namespace on the way through ([`process`]).
//! A client can hop between backends without reconnecting.

pub mod activeobject;
pub mod auth;
pub mod backend;
pub mod client;
pub mod content;
pub mod dialer;
pub mod directory;
pub mod hooks;
pub mod media;
pub mod namespace;
pub mod players;
pub mod probe;
pub mod process;
pub mod proxy;
pub mod retry;
pub mod state;

pub use auth::{AuthMath, CredentialStore, Credentials, SrpAuth};
pub use backend::BackendLink;
pub use client::{ClientLink, HopError};
pub use content::{Catalogue, GlobalContent, MuxError, NodeIdRegistry, Prober};
pub use dialer::{Dialer, TcpDialer};
pub use directory::{DirectoryError, ServerDescriptor, ServerDirectory};
pub use hooks::{ClientHook, HookBus, LeaveReason, PacketHook};
pub use media::{MediaCache, MemoryMediaCache, NoMediaCache};
pub use players::PlayerRegistry;
pub use probe::{LinkProber, ProbeError};
pub use proxy::{LinkSettings, Proxy, ProxyContext, ProxyError, Services};
pub use retry::RetryPolicy;
pub use state::LinkState;
