//! Channel name validation and prefix semantics.

use crate::limits::CHANNELLEN;

/// The first character of a channel name decides how the channel behaves
/// across the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanPrefix {
    /// `#` — propagated to every peer, standard TS reconciliation.
    Global,
    /// `&` — server-local, never propagated, never accepted from a peer.
    Local,
    /// `!` — globally unique, name carries a generated ID segment, the
    /// creator holds unique-op, triple chandelay.
    Safe,
    /// `+` — modeless; no status, no modes, never bursted when empty.
    Modeless,
}

impl ChanPrefix {
    /// Classify a channel name by its first character.
    pub fn of(name: &str) -> Option<ChanPrefix> {
        match name.as_bytes().first() {
            Some(b'#') => Some(ChanPrefix::Global),
            Some(b'&') => Some(ChanPrefix::Local),
            Some(b'!') => Some(ChanPrefix::Safe),
            Some(b'+') => Some(ChanPrefix::Modeless),
            _ => None,
        }
    }

    /// The prefix character.
    pub fn symbol(self) -> char {
        match self {
            ChanPrefix::Global => '#',
            ChanPrefix::Local => '&',
            ChanPrefix::Safe => '!',
            ChanPrefix::Modeless => '+',
        }
    }

    /// Whether channels of this kind are propagated to peers.
    pub fn is_remote(self) -> bool {
        !matches!(self, ChanPrefix::Local)
    }

    /// Chandelay multiplier; `!` channels linger three times longer.
    pub fn delay_factor(self) -> i64 {
        match self {
            ChanPrefix::Safe => 3,
            _ => 1,
        }
    }
}

/// Validate a channel name: recognised prefix, no separator or control
/// characters, and within the wire length limit.
pub fn check_channel_name(name: &str) -> bool {
    if ChanPrefix::of(name).is_none() || name.len() > CHANNELLEN {
        return false;
    }
    name.chars()
        .skip(1)
        .all(|c| c != ' ' && c != ',' && c != '\x07' && c != '\0' && !c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_prefixes() {
        assert_eq!(ChanPrefix::of("#chan"), Some(ChanPrefix::Global));
        assert_eq!(ChanPrefix::of("&local"), Some(ChanPrefix::Local));
        assert_eq!(ChanPrefix::of("!ABCDEchan"), Some(ChanPrefix::Safe));
        assert_eq!(ChanPrefix::of("+modeless"), Some(ChanPrefix::Modeless));
        assert_eq!(ChanPrefix::of("chan"), None);
        assert_eq!(ChanPrefix::of(""), None);
    }

    #[test]
    fn rejects_bad_names() {
        assert!(check_channel_name("#ok"));
        assert!(!check_channel_name("#with space"));
        assert!(!check_channel_name("#with,comma"));
        assert!(!check_channel_name("#with\x07bell"));
        assert!(!check_channel_name("nochan"));
    }

    #[test]
    fn safe_channels_have_triple_delay() {
        assert_eq!(ChanPrefix::Safe.delay_factor(), 3);
        assert_eq!(ChanPrefix::Global.delay_factor(), 1);
    }
}
