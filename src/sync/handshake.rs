//! Link bring-up: collecting PASS / CAPAB / SERVER from an unregistered
//! connection until it can be promoted to a server.

use zeroize::Zeroizing;

use mesh_proto::Command;

use crate::caps::Caps;
use crate::error::LinkError;
use crate::state::Sid;

/// Where an unregistered connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// They connected to us; we speak after they authenticate.
    Inbound,
    /// We connected to them and have already sent our credentials.
    Outbound,
    /// SERVER received; ready for `establish`.
    Ready,
}

/// What the caller should do after feeding a command in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Keep reading.
    Continue,
    /// All credentials collected; promote the connection.
    Establish,
}

/// Accumulated handshake state for one unregistered connection.
#[derive(Debug)]
pub struct LinkHandshake {
    /// Current state.
    pub state: HandshakeState,
    /// We initiated this connection.
    pub outbound: bool,
    /// Resolved hostname of the remote end.
    pub host: String,
    /// Raw address of the remote end.
    pub sockhost: String,
    /// Transport is secure.
    pub secure: bool,
    /// Password presented by the peer; wiped on promotion.
    pub password: Option<Zeroizing<String>>,
    /// SID presented in PASS.
    pub sid: Option<Sid>,
    /// Capabilities presented in CAPAB.
    pub caps: Caps,
    /// Server name presented in SERVER.
    pub name: Option<String>,
    /// Hopcount presented in SERVER.
    pub hopcount: u32,
    /// Description presented in SERVER.
    pub description: String,
}

impl LinkHandshake {
    /// Handshake for a connection the peer opened.
    pub fn inbound(host: String, sockhost: String, secure: bool) -> LinkHandshake {
        LinkHandshake {
            state: HandshakeState::Inbound,
            outbound: false,
            host,
            sockhost,
            secure,
            password: None,
            sid: None,
            caps: Caps::none(),
            name: None,
            hopcount: 0,
            description: String::new(),
        }
    }

    /// Handshake for a connection we opened.
    pub fn outbound(host: String, sockhost: String, secure: bool) -> LinkHandshake {
        LinkHandshake {
            state: HandshakeState::Outbound,
            outbound: true,
            ..LinkHandshake::inbound(host, sockhost, secure)
        }
    }

    /// Feed one pre-registration command in.
    pub fn step(&mut self, command: Command) -> Result<HandshakeAction, LinkError> {
        match command {
            Command::Pass { password, sid } => {
                self.password = Some(Zeroizing::new(password));
                self.sid = sid.map(Sid::new);
                Ok(HandshakeAction::Continue)
            }
            Command::Capab(tokens) => {
                self.caps = Caps::parse(&tokens);
                Ok(HandshakeAction::Continue)
            }
            Command::Server {
                name,
                hopcount,
                description,
            } => {
                self.name = Some(name);
                self.hopcount = hopcount;
                self.description = description;
                self.state = HandshakeState::Ready;
                Ok(HandshakeAction::Establish)
            }
            Command::Ping { .. } | Command::Pong { .. } => Ok(HandshakeAction::Continue),
            Command::Error { text } => Err(LinkError::Remote(text)),
            _ => Err(LinkError::Malformed("command before registration")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_credentials_until_server() {
        let mut hs = LinkHandshake::inbound("leaf.example.net".into(), "10.0.0.2".into(), false);
        assert_eq!(
            hs.step(Command::Pass {
                password: "sekrit".into(),
                sid: Some("42A".into()),
            })
            .unwrap(),
            HandshakeAction::Continue
        );
        assert_eq!(
            hs.step(Command::Capab(vec!["TS6".into(), "EX".into()]))
                .unwrap(),
            HandshakeAction::Continue
        );
        assert_eq!(
            hs.step(Command::Server {
                name: "leaf.example.net".into(),
                hopcount: 1,
                description: "a leaf".into(),
            })
            .unwrap(),
            HandshakeAction::Establish
        );
        assert_eq!(hs.state, HandshakeState::Ready);
        assert_eq!(hs.sid, Some(Sid::new("42A")));
        assert!(hs.caps.contains(Caps::TS6));
    }

    #[test]
    fn data_commands_before_registration_are_fatal() {
        let mut hs = LinkHandshake::inbound("x".into(), "x".into(), false);
        assert!(hs.step(Command::JoinZero).is_err());
    }
}
