//! # mesh-proto
//!
//! Wire protocol library for the meshircd federated relay.
//!
//! This crate owns everything about the byte-level protocol that does not
//! require server state:
//!
//! - The owned [`Message`] model (prefix + typed [`Command`]) with parsing
//!   and serialisation for the server-to-server command set
//! - RFC 1459 casemapping ([`irc_eq`], [`irc_to_lower`])
//! - Channel name validation and prefix semantics ([`ChanPrefix`])
//! - Hostmask wildcard matching ([`wildcard_match`])
//! - Numeric replies ([`Response`])
//! - Protocol limits ([`limits`])
//! - A newline-delimited codec for tokio framing (feature `tokio`)

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod chan;
pub mod command;
pub mod error;
pub mod limits;
#[cfg(feature = "tokio")]
pub mod line;
pub mod mask;
pub mod message;
pub mod response;

pub use self::casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use self::chan::{check_channel_name, ChanPrefix};
pub use self::command::{Command, SjoinMember, StatusPrefix};
pub use self::error::{MessageParseError, ProtocolError};
#[cfg(feature = "tokio")]
pub use self::line::LineCodec;
pub use self::mask::wildcard_match;
pub use self::message::Message;
pub use self::response::Response;

/// Check that a string is a well-formed TS6 server ID: three characters,
/// a leading digit followed by two digits or uppercase letters.
pub fn check_sid(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == limits::SIDLEN
        && bytes[0].is_ascii_digit()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
}

/// Check that a string is a well-formed TS6 user ID: a valid SID followed
/// by six digits or uppercase letters.
pub fn check_uid(s: &str) -> bool {
    s.len() == limits::UIDLEN
        && check_sid(&s[..limits::SIDLEN])
        && s.as_bytes()[limits::SIDLEN..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
}

/// Check that a string looks like a server name: at least one dot, no
/// spaces, and within the hostname length limit.
pub fn valid_servername(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= limits::HOSTLEN
        && s.contains('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' || c == '*')
}
