//! Configuration loading and validation.
//!
//! Configuration is a single TOML file. Everything the core consults at
//! runtime lives here; there is no hot-reload path for link blocks, a
//! link picks up its block when it is (re)established.

mod links;

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub use links::{HubRule, LinkBlock};

pub(crate) fn default_true() -> bool {
    true
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// This server's identity.
    pub server: ServerConfig,
    /// Channel policy knobs.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Peer link blocks.
    #[serde(default)]
    pub links: Vec<LinkBlock>,
    /// Hub/leaf topology rules.
    #[serde(default)]
    pub hubs: Vec<HubRule>,
    /// Reserved (juped) channel names.
    #[serde(default)]
    pub resv: Vec<ResvEntry>,
}

/// Identity and listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name, DNS-like.
    pub name: String,
    /// Three-character server ID.
    pub sid: String,
    /// Human-readable description.
    pub description: String,
    /// Address the S2S listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Whether this server may carry more than one link.
    #[serde(default = "default_true")]
    pub hub: bool,
    /// Suppress the real name when a masked identity is configured.
    #[serde(default)]
    pub hidden: bool,
}

fn default_listen() -> String {
    "0.0.0.0:7029".to_owned()
}

/// Channel behaviour knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Channels a non-oper may occupy; opers get three times this.
    #[serde(default = "default_max_chans")]
    pub max_chans_per_user: usize,
    /// Chandelay window in seconds; zero disables the delay entirely.
    #[serde(default)]
    pub delay: i64,
    /// Honour invite-exception (+I) masks in can_join.
    #[serde(default = "default_true")]
    pub use_invex: bool,
    /// Enforce +S against insecure transports.
    #[serde(default = "default_true")]
    pub use_sslonly: bool,
    /// Refuse non-oper joins while the network is split.
    #[serde(default)]
    pub no_join_on_split: bool,
    /// Refuse non-oper channel creation while split.
    #[serde(default)]
    pub no_create_on_split: bool,
    /// Withhold creator chanop while split.
    #[serde(default)]
    pub no_ops_on_split: bool,
    /// Server count below which the network counts as split.
    #[serde(default)]
    pub split_server_count: usize,
    /// User count below which the network counts as split.
    #[serde(default)]
    pub split_user_count: usize,
    /// Include the setter field in TB topic bursts.
    #[serde(default = "default_true")]
    pub burst_topicwho: bool,
    /// Burst AWAY lines after each UID.
    #[serde(default)]
    pub burst_away: bool,
}

fn default_max_chans() -> usize {
    15
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_chans_per_user: default_max_chans(),
            delay: 0,
            use_invex: true,
            use_sslonly: true,
            no_join_on_split: false,
            no_create_on_split: false,
            no_ops_on_split: false,
            split_server_count: 0,
            split_user_count: 0,
            burst_topicwho: true,
            burst_away: false,
        }
    }
}

/// One reserved channel name.
#[derive(Debug, Clone, Deserialize)]
pub struct ResvEntry {
    /// Channel name mask.
    pub mask: String,
    /// Operator-visible reason.
    #[serde(default)]
    pub reason: String,
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a string, used by tests.
    pub fn from_str(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !mesh_proto::check_sid(&self.server.sid) {
            return Err(ConfigError::Invalid(format!(
                "bad sid {:?}: want a digit followed by two digits or uppercase letters",
                self.server.sid
            )));
        }
        if !mesh_proto::valid_servername(&self.server.name) {
            return Err(ConfigError::Invalid(format!(
                "bad server name {:?}",
                self.server.name
            )));
        }
        for link in &self.links {
            if link.password.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "link {:?} has an empty password",
                    link.name
                )));
            }
        }
        Ok(())
    }

    /// Find the link block matching a peer's server name.
    pub fn link_for(&self, name: &str) -> Option<&LinkBlock> {
        self.links
            .iter()
            .find(|l| mesh_proto::wildcard_match(&l.name, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [server]
        name = "hub.example.net"
        sid = "00A"
        description = "test hub"
    "#;

    #[test]
    fn minimal_config_parses() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.sid, "00A");
        assert_eq!(config.channel.max_chans_per_user, 15);
        assert!(config.channel.use_invex);
        assert!(config.links.is_empty());
    }

    #[test]
    fn bad_sid_is_rejected()  {
        let bad = MINIMAL.replace("00A", "A00");
        assert!(matches!(
            Config::from_str(&bad),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn empty_link_password_is_rejected() {
        let text = format!(
            "{MINIMAL}\n[[links]]\nname = \"leaf.example.net\"\npassword = \"\"\n"
        );
        assert!(matches!(
            Config::from_str(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.server.name, "hub.example.net");
    }

    #[test]
    fn link_lookup_uses_masks() {
        let text = format!(
            "{MINIMAL}\n[[links]]\nname = \"*.example.net\"\npassword = \"sekrit\"\n"
        );
        let config = Config::from_str(&text).unwrap();
        assert!(config.link_for("leaf.example.net").is_some());
        assert!(config.link_for("leaf.example.org").is_none());
    }
}
