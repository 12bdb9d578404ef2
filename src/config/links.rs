//! Server-to-server link configuration.

use serde::Deserialize;

use super::default_true;

/// Link block for one peer server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkBlock {
    /// Remote server name; may be a mask when several leaves share one block.
    pub name: String,
    /// Host mask the connection must come from.
    #[serde(default = "any_host")]
    pub host: String,
    /// Address to connect to for outbound links.
    pub connect_host: Option<String>,
    /// Remote port for outbound links.
    #[serde(default)]
    pub port: u16,
    /// Password the peer must present.
    pub password: String,
    /// When set, `password` is a bcrypt hash rather than cleartext.
    #[serde(default)]
    pub password_is_hash: bool,
    /// Password we present to the peer; defaults to `password`.
    pub send_password: Option<String>,
    /// Refuse the link unless the transport is secure.
    #[serde(default)]
    pub require_tls: bool,
    /// Initiate the connection ourselves.
    #[serde(default)]
    pub autoconnect: bool,
    /// Masked identity presented to this peer instead of real names.
    pub mask: Option<String>,
    /// Send the state burst after establishing.
    #[serde(default = "default_true")]
    pub burst: bool,
    /// Allow TB topic bursts on this link.
    #[serde(default = "default_true")]
    pub topic_burst: bool,
    /// Negotiate compression on this link.
    #[serde(default)]
    pub compressed: bool,
}

fn any_host() -> String {
    "*".to_owned()
}

impl LinkBlock {
    /// The password we send during our half of the handshake.
    pub fn send_password(&self) -> &str {
        self.send_password.as_deref().unwrap_or(&self.password)
    }
}

/// Hub/leaf rule scoped to the introducing link.
///
/// `server` masks the name of the directly connected peer; `host` masks
/// the name being introduced. A link may introduce a server only when at
/// least one hub rule matches and no leaf rule does.
#[derive(Debug, Clone, Deserialize)]
pub struct HubRule {
    /// Mask on the direct link's server name.
    #[serde(default = "any_host")]
    pub server: String,
    /// Mask on the introduced server name.
    pub host: String,
    /// This rule forbids rather than allows.
    #[serde(default)]
    pub leaf: bool,
}
