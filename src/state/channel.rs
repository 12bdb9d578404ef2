//! Channel state.

use mesh_proto::limits::CHIDLEN;
use mesh_proto::ChanPrefix;

use super::ids::Uid;
use super::membership::MemberId;
use super::modes::Modes;

/// Channel topic with setter metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// An entry in one of the ban-style lists (ban, except, invex, reop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Cached channel info flags, distinct from wire-visible modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChanInfo {
    /// The channel name is hidden behind a server mask.
    pub masked: bool,
    /// Service channel: never destroyed, oper joins bypass checks.
    pub service: bool,
    /// Flood notice already issued.
    pub flooded: bool,
    /// Restricted to Japanese-capable links.
    pub jis: bool,
}

/// The four ban-style lists, addressed by their mode letter.
pub const BAN_LISTS: [char; 4] = ['b', 'e', 'I', 'R'];

/// A channel and everything hanging off it.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Full name including the prefix character.
    pub name: String,
    /// Channel timestamp; lower wins during merges, zero forces merge.
    pub ts: i64,
    /// Wire-visible mode state.
    pub modes: Modes,
    /// Current topic.
    pub topic: Option<Topic>,
    /// Ban masks (`+b`).
    pub bans: Vec<ListEntry>,
    /// Ban exceptions (`+e`).
    pub excepts: Vec<ListEntry>,
    /// Invite exceptions (`+I`).
    pub invexes: Vec<ListEntry>,
    /// Reop masks (`+R`).
    pub reops: Vec<ListEntry>,
    /// Bumped on every list change; invalidates cached ban verdicts.
    pub ban_serial: u32,
    /// Chandelay lock: set when the channel empties, cleared on join.
    pub chlock: Option<i64>,
    /// Reop clock: when limit-override admission last fired.
    pub reop_since: Option<i64>,
    /// Cached info flags.
    pub info: ChanInfo,
    /// Clients invited past +i/+b/+l.
    pub invites: Vec<Uid>,
    /// All memberships.
    pub members: Vec<MemberId>,
    /// Memberships of locally connected clients.
    pub local_members: Vec<MemberId>,
}

impl Channel {
    /// Fresh channel with no members, modes or timestamp.
    pub fn new(name: impl Into<String>) -> Channel {
        Channel {
            name: name.into(),
            ts: 0,
            modes: Modes::default(),
            topic: None,
            bans: Vec::new(),
            excepts: Vec::new(),
            invexes: Vec::new(),
            reops: Vec::new(),
            ban_serial: 0,
            chlock: None,
            reop_since: None,
            info: ChanInfo::default(),
            invites: Vec::new(),
            members: Vec::new(),
            local_members: Vec::new(),
        }
    }

    /// The name's prefix class. Names are validated on the way in, so a
    /// stored channel always has one.
    pub fn prefix(&self) -> ChanPrefix {
        ChanPrefix::of(&self.name).unwrap_or(ChanPrefix::Global)
    }

    /// For `!` channels, the name with the generated ID segment removed.
    pub fn shortname(&self) -> Option<&str> {
        if self.prefix() == ChanPrefix::Safe && self.name.len() > 1 + CHIDLEN {
            Some(&self.name[1 + CHIDLEN..])
        } else {
            None
        }
    }

    /// Whether the chandelay window is still open.
    pub fn has_history(&self, now: i64, delay: i64) -> bool {
        match self.chlock {
            Some(locked_at) => locked_at + delay * self.prefix().delay_factor() >= now,
            None => false,
        }
    }

    /// Locked: empty, not modeless, and still inside its delay window.
    /// Joins are refused while this holds.
    pub fn is_locked(&self, now: i64, delay: i64) -> bool {
        self.prefix() != ChanPrefix::Modeless
            && self.members.is_empty()
            && self.has_history(now, delay)
    }

    /// Access a ban-style list by its mode letter.
    pub fn list(&self, letter: char) -> Option<&Vec<ListEntry>> {
        match letter {
            'b' => Some(&self.bans),
            'e' => Some(&self.excepts),
            'I' => Some(&self.invexes),
            'R' => Some(&self.reops),
            _ => None,
        }
    }

    /// Mutable access to a ban-style list by its mode letter.
    pub fn list_mut(&mut self, letter: char) -> Option<&mut Vec<ListEntry>> {
        match letter {
            'b' => Some(&mut self.bans),
            'e' => Some(&mut self.excepts),
            'I' => Some(&mut self.invexes),
            'R' => Some(&mut self.reops),
            _ => None,
        }
    }

    /// Whether this client holds an invite.
    pub fn is_invited(&self, uid: &Uid) -> bool {
        self.invites.contains(uid)
    }

    /// Drop a client's invite, if any.
    pub fn del_invite(&mut self, uid: &Uid) {
        self.invites.retain(|u| u != uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortname_strips_id_segment() {
        let c = Channel::new("!ABCDEwidgets");
        assert_eq!(c.shortname(), Some("widgets"));
        assert_eq!(Channel::new("#widgets").shortname(), None);
    }

    #[test]
    fn lock_respects_delay_factor() {
        let mut c = Channel::new("#c");
        c.chlock = Some(100);
        assert!(c.is_locked(130, 60));
        assert!(!c.is_locked(200, 60));

        let mut safe = Channel::new("!ABCDEc");
        safe.chlock = Some(100);
        // triple window for ! channels
        assert!(safe.is_locked(200, 60));
        assert!(!safe.is_locked(300, 60));
    }

    #[test]
    fn modeless_channels_never_lock() {
        let mut c = Channel::new("+c");
        c.chlock = Some(100);
        assert!(!c.is_locked(110, 60));
    }
}
