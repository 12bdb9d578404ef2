//! Core state: registries, channels, memberships, modes.

pub mod bans;
pub mod channel;
pub mod client;
pub mod ids;
pub mod membership;
pub mod mesh;
pub mod modes;
pub mod registry;
pub mod store;
pub mod uid;

pub use channel::{Channel, ChanInfo, ListEntry, Topic};
pub use client::{Client, ServerRec};
pub use ids::{Sid, Uid};
pub use membership::{BanCache, MemberArena, MemberId, Membership, Status};
pub use mesh::{MeIdent, Mesh, Visibility};
pub use modes::{ModeFlags, ModeLineBuilder, Modes};
pub use registry::Registry;
pub use store::{ChanId, ChannelStore};
pub use uid::UidGenerator;
