//! Local JOIN handling: list parsing, `!`-channel creation, JOIN 0,
//! admission control and the resulting broadcasts.

use tracing::{debug, warn};

use mesh_proto::limits::{LOC_CHANNELLEN, MAX_PAYLOAD};
use mesh_proto::{irc_eq, wildcard_match, ChanPrefix, Response, SjoinMember};

use crate::broadcast::{source_ident, Audience};
use crate::caps::Caps;
use crate::state::bans::{compute_banned, match_ban};
use crate::state::membership::Status;
use crate::state::modes::ModeFlags;
use crate::state::store::ChanId;
use crate::state::uid::generate_chid;
use crate::state::{Mesh, Uid};

/// Handle a local client's JOIN: a comma-separated channel list with an
/// optional parallel key list.
pub fn local_join(mesh: &mut Mesh, uid: &Uid, channels: &str, keys: Option<&str>) {
    let Some(client) = mesh.registry.client(uid) else {
        return;
    };
    let oper = client.oper;

    // First pass: validate the requested names and rebuild the list.
    let mut jbuf: Vec<String> = Vec::new();
    for (idx, raw) in channels.split(',').enumerate() {
        if raw.is_empty() {
            continue;
        }
        if raw == "0" {
            if idx == 0 {
                jbuf.push("0".to_owned());
            } else {
                mesh.numeric_std(uid, Response::ERR_BADCHANNAME, raw);
            }
            continue;
        }
        // bad characters and oversize names are malformed; a missing
        // prefix is merely not a channel
        if !valid_channel_chars(raw) || raw.len() > LOC_CHANNELLEN {
            mesh.numeric_std(uid, Response::ERR_BADCHANNAME, raw);
            continue;
        }
        if ChanPrefix::of(raw).is_none() {
            mesh.numeric_std(uid, Response::ERR_NOSUCHCHANNEL, raw);
            continue;
        }
        if !oper && is_resv(mesh, raw) {
            let nuh = mesh.registry.client(uid).map(|c| c.nuh()).unwrap_or_default();
            warn!(channel = raw, client = %nuh, "join attempt on reserved channel");
            mesh.numeric_std(uid, Response::ERR_BADCHANNAME, raw);
            continue;
        }
        if mesh.splitmode
            && !oper
            && !raw.starts_with('&')
            && mesh.config.channel.no_join_on_split
        {
            mesh.numeric_std(uid, Response::ERR_UNAVAILRESOURCE, raw);
            continue;
        }
        jbuf.push(raw.to_owned());
    }

    let mut key_list = keys.unwrap_or("").split(',');
    let mut successful_joins = 0usize;

    for mut name in jbuf {
        let key = key_list.next().filter(|k| !k.is_empty());

        if name == "0" {
            let has_channels = mesh
                .registry
                .client(uid)
                .map(|c| !c.channels.is_empty())
                .unwrap_or(false);
            if has_channels {
                join_zero(mesh, uid);
            }
            continue;
        }

        // `!`-channel creation handshake: resolve short names, generate
        // the ID segment for fresh channels.
        let mut chan: Option<ChanId> = None;
        if name.starts_with('!') {
            match resolve_safe_channel(mesh, uid, &name) {
                SafeResolution::Use(id, full) => {
                    chan = Some(id);
                    name = full;
                }
                SafeResolution::Create(full) => name = full,
                SafeResolution::Declined => continue,
            }
        }

        let existing = chan.or_else(|| mesh.channels.find(&name));
        let mut flags;
        match existing {
            Some(id) => {
                if mesh.is_member(id, uid) {
                    continue;
                }
                flags = if mesh.channels.get(id).members.is_empty() {
                    Status::chanop()
                } else {
                    Status::peon()
                };
                chan = Some(id);
            }
            None => {
                if mesh.splitmode
                    && !oper
                    && !name.starts_with('&')
                    && mesh.config.channel.no_create_on_split
                {
                    mesh.numeric_std(uid, Response::ERR_UNAVAILRESOURCE, &name);
                    continue;
                }
                flags = Status::chanop();
            }
        }

        // creators of ! channels carry unique-op
        if name.starts_with('!') && flags.op {
            flags.uniq_op = true;
        }

        // per-user channel cap; opers get triple
        let count = mesh
            .registry
            .client(uid)
            .map(|c| c.channels.len())
            .unwrap_or(0);
        let max = mesh.config.channel.max_chans_per_user;
        if count >= max && (!oper || count >= max * 3) {
            mesh.numeric_std(uid, Response::ERR_TOOMANYCHANNELS, &name);
            if successful_joins > 0 {
                let now = mesh.now();
                if let Some(c) = mesh.registry.client_mut(uid) {
                    c.last_join = now;
                }
            }
            return;
        }

        // joining an existing occupied channel consumes a slot
        if flags.is_plain() {
            successful_joins += 1;
        }

        // a reclaimed empty channel starts from clean modes
        if let Some(id) = chan {
            if flags.op && !name.starts_with('!') {
                mesh.channels.get_mut(id).modes = Default::default();
            }
        }

        if mesh.splitmode && !name.starts_with('&') && mesh.config.channel.no_ops_on_split {
            flags = Status::peon();
        }
        if name.starts_with('+') {
            flags = Status::peon();
        }

        let (id, isnew) = match chan {
            Some(id) => (id, false),
            None => match mesh.channels.get_or_create(&name) {
                Some(pair) => pair,
                None => {
                    mesh.numeric_std(uid, Response::ERR_UNAVAILRESOURCE, &name);
                    successful_joins = successful_joins.saturating_sub(1);
                    continue;
                }
            },
        };
        if isnew {
            let now = mesh.now();
            mesh.channels.get_mut(id).ts = now;
        }

        // service channels grant no status locally
        if mesh.channels.get(id).info.service && name.starts_with('&') {
            flags = Status::peon();
        }

        let now = mesh.now();
        if mesh.channels.get(id).is_locked(now, mesh.config.channel.delay) {
            mesh.numeric_std(uid, Response::ERR_UNAVAILRESOURCE, &name);
            successful_joins = successful_joins.saturating_sub(1);
            continue;
        }

        if let Err(code) = can_join(mesh, uid, id, key) {
            mesh.numeric_std(uid, code, &name);
            successful_joins = successful_joins.saturating_sub(1);
            continue;
        }

        attach_and_announce(mesh, uid, id, flags);

        if successful_joins > 0 {
            let now = mesh.now();
            if let Some(c) = mesh.registry.client_mut(uid) {
                c.last_join = now;
            }
        }
    }

    mesh.debug_check();
}

/// How a `!`-name request resolved.
enum SafeResolution {
    /// Join this existing channel under its full name.
    Use(ChanId, String),
    /// Create a channel with this freshly generated full name.
    Create(String),
    /// An error numeric was already sent.
    Declined,
}

fn resolve_safe_channel(mesh: &mut Mesh, uid: &Uid, name: &str) -> SafeResolution {
    // a typed-out full name wins outright
    if let Some(id) = mesh.channels.find(name) {
        return SafeResolution::Use(id, mesh.channels.get(id).name.clone());
    }

    let creating = name[1..].starts_with('!') || name[1..].starts_with('#');
    let shortname = if creating { &name[2..] } else { &name[1..] };

    let matches = mesh.channels.find_by_shortname(shortname);
    match matches.len() {
        0 => {
            if !creating || shortname.is_empty() {
                mesh.numeric_std(uid, Response::ERR_NOSUCHCHANNEL, name);
                SafeResolution::Declined
            } else {
                SafeResolution::Create(format!("!{}{}", generate_chid(), shortname))
            }
        }
        1 => {
            let full = mesh.channels.get(matches[0]).name.clone();
            SafeResolution::Use(matches[0], full)
        }
        _ => {
            for id in matches {
                let full = mesh.channels.get(id).name.clone();
                mesh.numeric_std(uid, Response::ERR_TOOMANYTARGETS, &full);
            }
            SafeResolution::Declined
        }
    }
}

fn valid_channel_chars(name: &str) -> bool {
    name.chars()
        .all(|c| c != ' ' && c != ',' && c != '\x07' && c != '\0' && !c.is_control())
}

fn is_resv(mesh: &Mesh, name: &str) -> bool {
    mesh.config
        .resv
        .iter()
        .any(|entry| wildcard_match(&entry.mask, name))
}

/// Admission checks; `Ok` admits, `Err` carries the refusal numeric.
pub fn can_join(mesh: &mut Mesh, uid: &Uid, chan: ChanId, key: Option<&str>) -> Result<(), Response> {
    let now = mesh.now();
    let channel = mesh.channels.get(chan);
    let Some(client) = mesh.registry.client(uid) else {
        return Err(Response::ERR_NOSUCHCHANNEL);
    };

    if channel.info.service && client.oper {
        return Ok(());
    }

    let nuh = client.nuh();
    let flags = channel.modes.flags;
    let banned = compute_banned(channel, &nuh);
    let over_limit =
        channel.modes.limit > 0 && channel.members.len() >= channel.modes.limit as usize;
    let invited = channel.is_invited(uid);

    if flags.contains(ModeFlags::INVITE_ONLY) && !invited {
        if !mesh.config.channel.use_invex || !match_ban(&channel.invexes, &nuh) {
            return Err(Response::ERR_INVITEONLYCHAN);
        }
    }

    if banned && !invited {
        return Err(Response::ERR_BANNEDFROMCHAN);
    }

    if !channel.modes.key.is_empty() && !key.map(|k| irc_eq(k, &channel.modes.key)).unwrap_or(false)
    {
        return Err(Response::ERR_BADCHANNELKEY);
    }

    if mesh.config.channel.use_sslonly && flags.contains(ModeFlags::SSL_ONLY) && !client.secure {
        return Err(Response::ERR_SSLONLYCHAN);
    }

    if over_limit {
        if !invited && match_ban(&channel.reops, &nuh) {
            // the reop override only fires on an opless channel, and only
            // when no present member could reclaim ops themselves
            for mid in &channel.members {
                let Some(ms) = mesh.members.get(*mid) else {
                    continue;
                };
                if ms.status.op {
                    return Err(Response::ERR_CHANNELISFULL);
                }
                let member_nuh = mesh
                    .registry
                    .client(&ms.client)
                    .map(|c| c.nuh())
                    .unwrap_or_default();
                if match_ban(&channel.reops, &member_nuh) {
                    return Err(Response::ERR_CHANNELISFULL);
                }
            }
            mesh.channels.get_mut(chan).reop_since = Some(now);
            return Ok(());
        }
        if !invited {
            return Err(Response::ERR_CHANNELISFULL);
        }
    }

    // `r` also reads as registered-only on join
    if flags.contains(ModeFlags::REOP) && client.account.is_none() {
        return Err(Response::ERR_NEEDREGGEDNICK);
    }

    Ok(())
}

/// Attach the membership, deliver the JOIN to local members, propagate
/// to peers, and send topic and NAMES to the joiner.
fn attach_and_announce(mesh: &mut Mesh, uid: &Uid, chan: ChanId, flags: Status) {
    let now = mesh.now();

    mesh.add_user_to_channel(chan, uid, flags);

    let (name, src) = {
        let channel = mesh.channels.get(chan);
        let Some(client) = mesh.registry.client(uid) else {
            return;
        };
        (
            channel.name.clone(),
            source_ident(channel, &client.nick, &client.user, &client.host),
        )
    };
    mesh.sendto_channel_local(chan, Audience::All, format!(":{src} JOIN :{name}"));

    if flags.op {
        // a fresh channel: stamp its TS, and for # channels start from +nt
        let safe = name.starts_with('!');
        {
            let channel = mesh.channels.get_mut(chan);
            channel.ts = now;
            if !safe {
                channel.modes.flags.insert(ModeFlags::NO_EXTERNAL);
                channel.modes.flags.insert(ModeFlags::TOPIC_LIMIT);
            }
        }
        if !safe {
            let me = mesh.me.name.clone();
            mesh.sendto_channel_local(chan, Audience::ChanOps, format!(":{me} MODE {name} +nt"));
        }

        let modes = if safe { "+".to_owned() } else { "+nt".to_owned() };
        let member = SjoinMember::new(flags.to_prefix(), uid.as_str());
        let line = format!(
            ":{} SJOIN {} {} {} :{}",
            mesh.me.sid, now, name, modes, member
        );
        mesh.propagate(Some(chan), Caps::TS6, Caps::none(), None, line);
    } else {
        let ts = mesh.channels.get(chan).ts;
        let line = format!(":{uid} JOIN {ts} {name} +");
        mesh.propagate(Some(chan), Caps::TS6, Caps::none(), None, line);
    }

    mesh.channels.get_mut(chan).del_invite(uid);

    // topic, then NAMES
    let topic = mesh.channels.get(chan).topic.clone();
    if let Some(topic) = topic {
        mesh.numeric(uid, Response::RPL_TOPIC, &format!("{} :{}", name, topic.text));
        mesh.numeric(
            uid,
            Response::RPL_TOPICWHOTIME,
            &format!("{} {} {}", name, topic.set_by, topic.set_at),
        );
    }
    channel_member_names(mesh, chan, uid);

    debug!(channel = %name, client = %uid, op = flags.op, "local join");
}

/// JOIN 0: part every channel the client is in, propagate once.
pub fn join_zero(mesh: &mut Mesh, uid: &Uid) {
    mesh.propagate(
        None,
        Caps::TS6,
        Caps::none(),
        None,
        format!(":{uid} JOIN 0"),
    );

    loop {
        let Some(&mid) = mesh
            .registry
            .client(uid)
            .and_then(|c| c.channels.first())
        else {
            break;
        };
        let chan = match mesh.members.get(mid) {
            Some(ms) => ms.channel,
            None => break,
        };
        let (name, src) = {
            let channel = mesh.channels.get(chan);
            let Some(client) = mesh.registry.client(uid) else {
                break;
            };
            (
                channel.name.clone(),
                source_ident(channel, &client.nick, &client.user, &client.host),
            )
        };
        mesh.sendto_channel_local(chan, Audience::All, format!(":{src} PART {name}"));
        let (chan, _, status) = mesh.remove_membership(mid);
        mesh.channel_emptied(chan, status.op);
    }

    mesh.debug_check();
}

/// NAMES delivery after a join: 353 batches plus 366.
pub fn channel_member_names(mesh: &mut Mesh, chan: ChanId, viewer: &Uid) {
    let channel = mesh.channels.get(chan);
    let name = channel.name.clone();
    let symbol = if channel.modes.flags.contains(ModeFlags::SECRET) {
        '@'
    } else if channel.modes.flags.contains(ModeFlags::PRIVATE) {
        '*'
    } else {
        '='
    };
    let anonymous = channel.modes.flags.contains(ModeFlags::ANONYMOUS);

    let mut entries: Vec<String> = Vec::new();
    for mid in &channel.members {
        let Some(ms) = mesh.members.get(*mid) else {
            continue;
        };
        if anonymous && &ms.client != viewer {
            continue;
        }
        let Some(member) = mesh.registry.client(&ms.client) else {
            continue;
        };
        let prefix = if ms.status.op {
            "@"
        } else if ms.status.voice {
            "+"
        } else {
            ""
        };
        entries.push(format!("{prefix}{}", member.nick));
    }

    let head_len = mesh.me.name.len() + name.len() + 32;
    let mut line = String::new();
    for entry in entries {
        if !line.is_empty() && head_len + line.len() + entry.len() + 1 > MAX_PAYLOAD {
            mesh.numeric(
                viewer,
                Response::RPL_NAMREPLY,
                &format!("{symbol} {name} :{line}"),
            );
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&entry);
    }
    if !line.is_empty() {
        mesh.numeric(
            viewer,
            Response::RPL_NAMREPLY,
            &format!("{symbol} {name} :{line}"),
        );
    }
    mesh.numeric_std(viewer, Response::RPL_ENDOFNAMES, &name);
}
