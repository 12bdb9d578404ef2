//! Ban-style list matching with per-membership caching.

use mesh_proto::wildcard_match;

use super::channel::{Channel, ListEntry};
use super::client::Client;
use super::membership::Membership;

/// Whether any entry of a list matches the given `nick!user@host`.
pub fn match_ban(list: &[ListEntry], nuh: &str) -> bool {
    list.iter().any(|entry| wildcard_match(&entry.mask, nuh))
}

/// The uncached ban verdict: banned and not excepted.
pub fn compute_banned(channel: &Channel, nuh: &str) -> bool {
    match_ban(&channel.bans, nuh) && !match_ban(&channel.excepts, nuh)
}

/// Ban check with the membership-side cache.
///
/// The verdict is cached on the membership keyed by the channel's ban
/// serial; any list change bumps the serial and invalidates every cached
/// verdict at once.
pub fn is_banned(channel: &Channel, client: &Client, membership: Option<&mut Membership>) -> bool {
    match membership {
        Some(ms) => {
            if ms.cache.valid && ms.cache.serial == channel.ban_serial {
                return ms.cache.banned;
            }
            let banned = compute_banned(channel, &client.nuh());
            ms.cache.valid = true;
            ms.cache.serial = channel.ban_serial;
            ms.cache.banned = banned;
            banned
        }
        None => compute_banned(channel, &client.nuh()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ids::{Sid, Uid};
    use crate::state::membership::{BanCache, Status};

    fn entry(mask: &str) -> ListEntry {
        ListEntry {
            mask: mask.to_owned(),
            set_by: "setter".to_owned(),
            set_at: 0,
        }
    }

    fn client(nick: &str) -> Client {
        Client {
            uid: Uid::new("001AAAAAA"),
            nick: nick.to_owned(),
            user: "u".to_owned(),
            host: "h.example.com".to_owned(),
            ip: "0".to_owned(),
            nick_ts: 0,
            umodes: "+".to_owned(),
            gecos: String::new(),
            server: Sid::new("001"),
            away: None,
            oper: false,
            secure: false,
            account: None,
            channels: Vec::new(),
            last_join: 0,
        }
    }

    #[test]
    fn except_overrides_ban() {
        let mut chan = Channel::new("#c");
        chan.bans.push(entry("*!*@h.example.com"));
        assert!(compute_banned(&chan, &client("x").nuh()));
        chan.excepts.push(entry("x!*@*"));
        assert!(!compute_banned(&chan, &client("x").nuh()));
    }

    #[test]
    fn cache_invalidated_by_serial_bump() {
        let mut chan = Channel::new("#c");
        let who = client("victim");
        let mut ms = Membership {
            channel: 0,
            client: who.uid.clone(),
            status: Status::peon(),
            cache: BanCache::default(),
        };

        assert!(!is_banned(&chan, &who, Some(&mut ms)));
        chan.bans.push(entry("victim!*@*"));
        // stale serial still serves the cached verdict
        assert!(!is_banned(&chan, &who, Some(&mut ms)));
        chan.ban_serial += 1;
        assert!(is_banned(&chan, &who, Some(&mut ms)));
    }
}
