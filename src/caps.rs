//! Link capability negotiation.

use std::fmt;

/// Capability bitset negotiated per link via CAPAB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caps(u32);

impl Caps {
    /// TS6 identifiers and timestamps; mandatory on direct links.
    pub const TS6: Caps = Caps(0x0001);
    /// Quit storm suppression on SQUIT.
    pub const QS: Caps = Caps(0x0002);
    /// Ban exceptions (`+e`) accepted in bursts.
    pub const EX: Caps = Caps(0x0004);
    /// Invite exceptions (`+I`) accepted in bursts.
    pub const IE: Caps = Caps(0x0008);
    /// Topic burst.
    pub const TB: Caps = Caps(0x0010);
    /// Compressed link.
    pub const ZIP: Caps = Caps(0x0020);
    /// Reop lists (`+R`) and EOB signalling.
    pub const RE: Caps = Caps(0x0040);

    const TOKENS: [(&'static str, Caps); 7] = [
        ("TS6", Caps::TS6),
        ("QS", Caps::QS),
        ("EX", Caps::EX),
        ("IE", Caps::IE),
        ("TB", Caps::TB),
        ("ZIP", Caps::ZIP),
        ("RE", Caps::RE),
    ];

    /// No capabilities.
    pub fn none() -> Caps {
        Caps(0)
    }

    /// Everything we implement; what we advertise in CAPAB.
    pub fn all_supported() -> Caps {
        Caps::TS6 | Caps::QS | Caps::EX | Caps::IE | Caps::TB | Caps::RE
    }

    /// Whether every bit of `other` is present.
    pub fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit of `other` is present.
    pub fn lacks_all(self, other: Caps) -> bool {
        self.0 & other.0 == 0
    }

    /// Clear bits.
    pub fn clear(&mut self, other: Caps) {
        self.0 &= !other.0;
    }

    /// Parse a CAPAB token list; unknown tokens are ignored.
    pub fn parse(tokens: &[String]) -> Caps {
        let mut caps = Caps::none();
        for token in tokens {
            for (name, cap) in Caps::TOKENS {
                if token == name {
                    caps = caps | cap;
                }
            }
        }
        caps
    }

    /// Render as a CAPAB token list.
    pub fn tokens(self) -> Vec<String> {
        Caps::TOKENS
            .iter()
            .filter(|(_, cap)| self.contains(*cap))
            .map(|(name, _)| (*name).to_owned())
            .collect()
    }
}

impl std::ops::BitOr for Caps {
    type Output = Caps;
    fn bitor(self, rhs: Caps) -> Caps {
        Caps(self.0 | rhs.0)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_unknown_tokens() {
        let caps = Caps::parse(&["TS6".into(), "EX".into(), "BOGUS".into()]);
        assert!(caps.contains(Caps::TS6 | Caps::EX));
        assert!(caps.lacks_all(Caps::IE));
    }

    #[test]
    fn tokens_round_trip() {
        let caps = Caps::all_supported();
        assert_eq!(Caps::parse(&caps.tokens()), caps);
    }
}
