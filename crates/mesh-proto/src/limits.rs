//! Protocol limits shared by every component.

/// Wire buffer size; a full line including CRLF never exceeds this.
pub const BUFSIZE: usize = 512;

/// Maximum payload per line, excluding the CRLF terminator.
pub const MAX_PAYLOAD: usize = 510;

/// Maximum channel name length accepted from the network.
pub const CHANNELLEN: usize = 200;

/// Maximum channel name length a local client may create or join.
pub const LOC_CHANNELLEN: usize = 50;

/// Maximum channel key length.
pub const KEYLEN: usize = 23;

/// Length of the generated ID segment in `!`-channel names.
pub const CHIDLEN: usize = 5;

/// Maximum parameter-bearing mode letters per emitted MODE line.
pub const MAXMODEPARAMS: usize = 3;

/// Server ID length.
pub const SIDLEN: usize = 3;

/// User ID length (SID plus six characters).
pub const UIDLEN: usize = 9;

/// Maximum hostname / server name length.
pub const HOSTLEN: usize = 63;

/// Maximum nickname length.
pub const NICKLEN: usize = 15;
