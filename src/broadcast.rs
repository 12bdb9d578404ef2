//! The outbox: rendered lines addressed to local members or peers.
//!
//! Core handlers never write to sockets; they append addressed lines
//! here, and the network layer drains the outbox after each command.
//! Tests inspect it directly.

use crate::caps::Caps;
use crate::state::channel::Channel;
use crate::state::ids::{Sid, Uid};
use crate::state::membership::Status;
use crate::state::store::ChanId;

/// Which local members of a channel receive a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every member.
    All,
    /// Chanops only.
    ChanOps,
    /// Chanops and voiced members.
    ChanOpsVoiced,
}

impl Audience {
    /// Whether a member with this status is included.
    pub fn admits(self, status: Status) -> bool {
        match self {
            Audience::All => true,
            Audience::ChanOps => status.op,
            Audience::ChanOpsVoiced => status.op || status.voice,
        }
    }
}

/// Where a rendered line is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Local members of a channel. Recipients are resolved when the
    /// line is queued, so a delivery survives the channel being
    /// destroyed later in the same command.
    Channel {
        /// The channel, for filtering in tests.
        chan: ChanId,
        /// Status filter that selected the recipients.
        audience: Audience,
        /// Local members the line goes to.
        to: Vec<Uid>,
    },
    /// One local client.
    Client(Uid),
    /// Every direct peer passing the capability filter.
    Peers {
        /// Required capabilities.
        caps: Caps,
        /// Forbidden capabilities.
        nocaps: Caps,
        /// Peer not to send to, usually the one a line arrived from.
        exclude: Option<Sid>,
    },
    /// One direct peer.
    Peer(Sid),
}

/// A rendered line with its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutLine {
    /// Destination.
    pub target: Target,
    /// The wire line, without CRLF.
    pub line: String,
}

/// Accumulates output produced while handling one command.
#[derive(Debug, Default)]
pub struct Outbox {
    lines: Vec<OutLine>,
}

impl Outbox {
    /// Append a line.
    pub fn push(&mut self, target: Target, line: String) {
        self.lines.push(OutLine { target, line });
    }

    /// Take everything accumulated so far.
    pub fn drain(&mut self) -> Vec<OutLine> {
        std::mem::take(&mut self.lines)
    }

    /// Peek without draining; used by tests.
    pub fn lines(&self) -> &[OutLine] {
        &self.lines
    }

    /// Lines addressed to peers, used by tests.
    pub fn peer_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| matches!(l.target, Target::Peers { .. } | Target::Peer(_)))
            .map(|l| l.line.as_str())
            .collect()
    }

    /// Lines addressed to a channel's local members, used by tests.
    pub fn channel_lines(&self, chan: ChanId) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| matches!(&l.target, Target::Channel { chan: c, .. } if *c == chan))
            .map(|l| l.line.as_str())
            .collect()
    }

    /// Lines addressed to one local client, used by tests.
    pub fn client_lines(&self, uid: &Uid) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| matches!(&l.target, Target::Client(u) if u == uid))
            .map(|l| l.line.as_str())
            .collect()
    }
}

/// Render a `nick!user@host` source for channel broadcasts, applying the
/// anonymous-channel rewrite at the boundary. State is never mutated.
pub fn source_ident(channel: &Channel, nick: &str, user: &str, host: &str) -> String {
    if channel
        .modes
        .flags
        .contains(crate::state::modes::ModeFlags::ANONYMOUS)
    {
        "anonymous!anonymous@anonymous.".to_owned()
    } else {
        format!("{nick}!{user}@{host}")
    }
}

/// A bare name for MODE parameters, anonymised on `+a` channels.
pub fn visible_name<'a>(channel: &Channel, name: &'a str) -> &'a str {
    if channel
        .modes
        .flags
        .contains(crate::state::modes::ModeFlags::ANONYMOUS)
    {
        "anonymous"
    } else {
        name
    }
}
