//! Numeric replies used by the relay core.

#![allow(non_camel_case_types)]

/// Numeric response codes referenced by the core.
///
/// Only the numerics the channel and link machinery emits are modelled;
/// anything else arriving from the wire stays a raw command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Response {
    /// 265 - current local users
    RPL_LOCALUSERS = 265,
    /// 266 - current global users
    RPL_GLOBALUSERS = 266,
    /// 332 - channel topic
    RPL_TOPIC = 332,
    /// 333 - topic setter and time
    RPL_TOPICWHOTIME = 333,
    /// 353 - NAMES reply
    RPL_NAMREPLY = 353,
    /// 366 - end of NAMES
    RPL_ENDOFNAMES = 366,
    /// 403 - no such channel
    ERR_NOSUCHCHANNEL = 403,
    /// 405 - too many channels
    ERR_TOOMANYCHANNELS = 405,
    /// 407 - duplicate recipients
    ERR_TOOMANYTARGETS = 407,
    /// 437 - resource temporarily unavailable
    ERR_UNAVAILRESOURCE = 437,
    /// 471 - channel is full (+l)
    ERR_CHANNELISFULL = 471,
    /// 473 - invite-only channel (+i)
    ERR_INVITEONLYCHAN = 473,
    /// 474 - banned from channel (+b)
    ERR_BANNEDFROMCHAN = 474,
    /// 475 - bad channel key (+k)
    ERR_BADCHANNELKEY = 475,
    /// 477 - registered clients only (+r)
    ERR_NEEDREGGEDNICK = 477,
    /// 479 - illegal channel name
    ERR_BADCHANNAME = 479,
    /// 480 - secure clients only (+S)
    ERR_SSLONLYCHAN = 480,
}

impl Response {
    /// The three-digit wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look a numeric up by wire code.
    pub fn from_code(code: u16) -> Option<Response> {
        Some(match code {
            265 => Response::RPL_LOCALUSERS,
            266 => Response::RPL_GLOBALUSERS,
            332 => Response::RPL_TOPIC,
            333 => Response::RPL_TOPICWHOTIME,
            353 => Response::RPL_NAMREPLY,
            366 => Response::RPL_ENDOFNAMES,
            403 => Response::ERR_NOSUCHCHANNEL,
            405 => Response::ERR_TOOMANYCHANNELS,
            407 => Response::ERR_TOOMANYTARGETS,
            437 => Response::ERR_UNAVAILRESOURCE,
            471 => Response::ERR_CHANNELISFULL,
            473 => Response::ERR_INVITEONLYCHAN,
            474 => Response::ERR_BANNEDFROMCHAN,
            475 => Response::ERR_BADCHANNELKEY,
            477 => Response::ERR_NEEDREGGEDNICK,
            479 => Response::ERR_BADCHANNAME,
            480 => Response::ERR_SSLONLYCHAN,
            _ => return None,
        })
    }

    /// Whether this numeric reports an error.
    pub fn is_error(self) -> bool {
        self.code() >= 400
    }

    /// Canonical reply text for the error numerics.
    pub fn text(self) -> &'static str {
        match self {
            Response::RPL_LOCALUSERS => "Current local users",
            Response::RPL_GLOBALUSERS => "Current global users",
            Response::RPL_TOPIC => "",
            Response::RPL_TOPICWHOTIME => "",
            Response::RPL_NAMREPLY => "",
            Response::RPL_ENDOFNAMES => "End of /NAMES list.",
            Response::ERR_NOSUCHCHANNEL => "No such channel",
            Response::ERR_TOOMANYCHANNELS => "You have joined too many channels",
            Response::ERR_TOOMANYTARGETS => "Duplicate recipients. No message delivered",
            Response::ERR_UNAVAILRESOURCE => "Nick/channel is temporarily unavailable",
            Response::ERR_CHANNELISFULL => "Cannot join channel (+l)",
            Response::ERR_INVITEONLYCHAN => "Cannot join channel (+i)",
            Response::ERR_BANNEDFROMCHAN => "Cannot join channel (+b)",
            Response::ERR_BADCHANNELKEY => "Cannot join channel (+k)",
            Response::ERR_NEEDREGGEDNICK => "You need a registered nick to join that channel",
            Response::ERR_BADCHANNAME => "Illegal channel name",
            Response::ERR_SSLONLYCHAN => "Cannot join channel (Secure connections only)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_codes() {
        for code in [265, 266, 332, 333, 353, 366, 403, 437, 471, 479, 480] {
            let r = Response::from_code(code).unwrap();
            assert_eq!(r.code(), code);
        }
        assert!(Response::from_code(999).is_none());
    }

    #[test]
    fn error_classification() {
        assert!(Response::ERR_BADCHANNAME.is_error());
        assert!(!Response::RPL_TOPIC.is_error());
    }
}
