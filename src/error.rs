//! Error types for the relay core.
//!
//! Link-level failures terminate the offending peer connection with an
//! ERROR line; they never unwind the dispatcher. Client-visible join
//! failures are plain numerics and travel as [`mesh_proto::Response`]
//! values, not as errors.

use thiserror::Error;

/// Reasons `check_server` can refuse a handshake.
///
/// The wire only ever sees the generic ERROR text; which field failed is
/// logged, not leaked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("no link block for server")]
    NoLinkBlock,

    #[error("invalid password")]
    InvalidPassword,

    #[error("invalid host")]
    InvalidHost,

    #[error("invalid servername")]
    InvalidServerName,

    #[error("connection requires TLS but is plaintext")]
    NeedsTls,
}

impl CheckError {
    /// The ERROR-line text sent to the peer. Deliberately less specific
    /// than the log message.
    pub fn wire_text(&self) -> &'static str {
        match self {
            CheckError::NoLinkBlock => "Invalid servername.",
            CheckError::InvalidPassword => "Invalid password.",
            CheckError::InvalidHost => "Invalid host.",
            CheckError::InvalidServerName => "Invalid servername.",
            CheckError::NeedsTls => "Access denied, requires TLS",
        }
    }
}

/// Fatal conditions on a server link.
///
/// Every variant terminates the link it occurred on; the `Display` text is
/// what goes out on the ERROR line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Invalid servername.")]
    InvalidServerName,

    #[error("Invalid SID")]
    InvalidSid,

    #[error("Server {0} already exists")]
    ServerExists(String),

    #[error("SID {0} already exists")]
    SidExists(String),

    #[error("UID {0} already exists")]
    UidExists(String),

    #[error("Incompatible TS version")]
    NonTs6,

    #[error("No matching hub_mask.")]
    NoHubMask,

    #[error("Matching leaf_mask")]
    LeafedServer,

    #[error("I'm a leaf not a hub")]
    LeafNotHub,

    #[error("{}", .0.wire_text())]
    Rejected(#[from] CheckError),

    #[error("Malformed {0}")]
    Malformed(&'static str),

    #[error("Closing link: {0}")]
    Remote(String),
}

impl LinkError {
    /// Render the ERROR line sent before the link is dropped.
    pub fn error_line(&self) -> String {
        format!("ERROR :{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_collision_error_line() {
        let e = LinkError::SidExists("42A".into());
        assert_eq!(e.error_line(), "ERROR :SID 42A already exists");
    }

    #[test]
    fn auth_failures_stay_vague() {
        let e = LinkError::Rejected(CheckError::NoLinkBlock);
        assert_eq!(e.error_line(), "ERROR :Invalid servername.");
        let e = LinkError::Rejected(CheckError::InvalidPassword);
        assert_eq!(e.error_line(), "ERROR :Invalid password.");
    }
}
