//! Client and server records.

use super::ids::{Sid, Uid};
use super::membership::MemberId;
use crate::caps::Caps;

/// A user known to the mesh, local or remote.
#[derive(Debug, Clone)]
pub struct Client {
    /// Stable identifier.
    pub uid: Uid,
    /// Current nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Visible hostname.
    pub host: String,
    /// IP address, or `"0"` when hidden.
    pub ip: String,
    /// Nickname timestamp.
    pub nick_ts: i64,
    /// User mode string, carried opaquely through bursts.
    pub umodes: String,
    /// Real name.
    pub gecos: String,
    /// Owning server.
    pub server: Sid,
    /// Away message.
    pub away: Option<String>,
    /// Network operator.
    pub oper: bool,
    /// Connected over a secure transport.
    pub secure: bool,
    /// Services account, when identified.
    pub account: Option<String>,
    /// Handles into the membership arena, one per channel.
    pub channels: Vec<MemberId>,
    /// When this client last consumed a join slot.
    pub last_join: i64,
}

impl Client {
    /// `nick!user@host`, the shape every mask is matched against.
    pub fn nuh(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }
}

/// A server in the mesh.
#[derive(Debug, Clone)]
pub struct ServerRec {
    /// Stable identifier.
    pub sid: Sid,
    /// Server name, possibly a configured mask.
    pub name: String,
    /// Hops from us.
    pub hopcount: u32,
    /// The server that introduced this one; `None` only for ourselves.
    pub via: Option<Sid>,
    /// Human description.
    pub description: String,
    /// Real name when `name` is masked.
    pub realname: Option<String>,
    /// Negotiated capability set.
    pub caps: Caps,
    /// Has signalled end-of-burst.
    pub sent_eob: bool,
}
