//! The owned message model and line parser.

use std::fmt;
use std::str::FromStr;

use crate::command::Command;
use crate::error::{MessageParseError, ProtocolError};

/// A complete wire message: optional source prefix plus a typed command.
///
/// The prefix is kept as the raw token (a SID, a UID, or a server name);
/// resolving it against the registries is the daemon's job.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Source token without the leading `:`.
    pub prefix: Option<String>,
    /// The command and its parameters.
    pub command: Command,
}

impl Message {
    /// Build a message without a prefix.
    pub fn from_command(command: Command) -> Message {
        Message {
            prefix: None,
            command,
        }
    }

    /// Build a message with a source prefix.
    pub fn with_prefix(prefix: impl Into<String>, command: Command) -> Message {
        Message {
            prefix: Some(prefix.into()),
            command,
        }
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Message, ProtocolError> {
        let line = s.trim_end_matches(['\r', '\n']);
        parse_line(line).map_err(|cause| ProtocolError::InvalidMessage {
            string: line.to_owned(),
            cause,
        })
    }
}

fn parse_line(line: &str) -> Result<Message, MessageParseError> {
    if line.is_empty() {
        return Err(MessageParseError::EmptyMessage);
    }

    let mut rest = line;

    let prefix = if let Some(stripped) = rest.strip_prefix(':') {
        let (prefix, tail) = stripped
            .split_once(' ')
            .ok_or(MessageParseError::MissingCommand)?;
        rest = tail.trim_start_matches(' ');
        Some(prefix.to_owned())
    } else {
        None
    };

    let (word, mut tail) = match rest.split_once(' ') {
        Some((w, t)) => (w, t),
        None => (rest, ""),
    };
    if word.is_empty() {
        return Err(MessageParseError::MissingCommand);
    }

    let mut params: Vec<String> = Vec::new();
    loop {
        tail = tail.trim_start_matches(' ');
        if tail.is_empty() {
            break;
        }
        if let Some(trailing) = tail.strip_prefix(':') {
            params.push(trailing.to_owned());
            break;
        }
        match tail.split_once(' ') {
            Some((p, t)) => {
                params.push(p.to_owned());
                tail = t;
            }
            None => {
                params.push(tail.to_owned());
                break;
            }
        }
    }

    Ok(Message {
        prefix,
        command: Command::new(word, params)?,
    })
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn parses_prefixed_sjoin() {
        let msg: Message = ":00A SJOIN 900 #c +i :@00AAAAAAC"
            .parse()
            .expect("valid line");
        assert_eq!(msg.prefix.as_deref(), Some("00A"));
        match msg.command {
            Command::Sjoin {
                ts,
                channel,
                modes,
                members,
                ..
            } => {
                assert_eq!(ts, 900);
                assert_eq!(channel, "#c");
                assert_eq!(modes, "+i");
                assert_eq!(members.len(), 1);
                assert!(members[0].status.op);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_unprefixed_ping() {
        let msg: Message = "PING :hub.example.net\r\n".parse().expect("valid line");
        assert!(msg.prefix.is_none());
        assert_eq!(
            msg.command,
            Command::Ping {
                origin: "hub.example.net".into(),
                target: None,
            }
        );
    }

    #[test]
    fn display_round_trip() {
        let raw = ":00A SID leaf.example.net 2 00B :A leaf server";
        let msg: Message = raw.parse().expect("valid line");
        assert_eq!(msg.to_string(), raw);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Message>().is_err());
        assert!(":onlyprefix".parse::<Message>().is_err());
    }
}
