//! The remaining peer-originated commands: user introduction and exit,
//! list bursts, topic bursts, remote modes, end-of-burst.

use tracing::{debug, warn};

use mesh_proto::{check_uid, Response};

use crate::broadcast::{source_ident, visible_name, Audience};
use crate::caps::Caps;
use crate::error::LinkError;
use crate::state::channel::ListEntry;
use crate::state::modes::{ModeFlags, ModeLineBuilder};
use crate::state::{Client, Mesh, Sid, Uid};
use crate::sync::split;

/// `:<introducer-sid> UID ...` — a transit user.
#[allow(clippy::too_many_arguments)]
pub fn handle_uid(
    mesh: &mut Mesh,
    from_link: &Sid,
    nick: &str,
    hopcount: u32,
    ts: i64,
    umodes: &str,
    user: &str,
    host: &str,
    ip: &str,
    uid_str: &str,
    gecos: &str,
) -> Result<(), LinkError> {
    if !check_uid(uid_str) {
        return Err(LinkError::Malformed("UID"));
    }
    let uid = Uid::new(uid_str);
    let owner = uid.sid();
    if mesh.registry.server(&owner).is_none() {
        warn!(uid = uid_str, "UID from unknown server");
        return Err(LinkError::Malformed("UID from unknown SID"));
    }
    if mesh.registry.route_to(&owner).as_ref() != Some(from_link) {
        // fake direction; drop the user, keep the link
        return Ok(());
    }
    if mesh.registry.client(&uid).is_some() {
        return Err(LinkError::UidExists(uid_str.to_owned()));
    }

    // nick collision: the younger client loses
    if let Some(existing) = mesh.registry.find_nick(nick).cloned() {
        let existing_ts = mesh
            .registry
            .client(&existing)
            .map(|c| c.nick_ts)
            .unwrap_or(0);
        if ts >= existing_ts {
            debug!(nick, "incoming nick collision loser dropped");
            return Ok(());
        }
        split::remove_client(mesh, &existing, "Nick collision");
    }

    let client = Client {
        uid: uid.clone(),
        nick: nick.to_owned(),
        user: user.to_owned(),
        host: host.to_owned(),
        ip: ip.to_owned(),
        nick_ts: ts,
        umodes: umodes.to_owned(),
        gecos: gecos.to_owned(),
        server: owner.clone(),
        away: None,
        oper: umodes.contains('o'),
        secure: umodes.contains('S'),
        account: None,
        channels: Vec::new(),
        last_join: 0,
    };
    mesh.registry
        .add_client(client)
        .map_err(|_| LinkError::UidExists(uid_str.to_owned()))?;

    let line = format!(
        ":{owner} UID {nick} {} {ts} {umodes} {user} {host} {ip} {uid} :{gecos}",
        hopcount + 1
    );
    mesh.propagate(None, Caps::TS6, Caps::none(), Some(from_link.clone()), line);
    Ok(())
}

/// `:<uid> AWAY [:<text>]`.
pub fn handle_away(mesh: &mut Mesh, from_link: &Sid, source: &Uid, text: Option<&str>) {
    if let Some(client) = mesh.registry.client_mut(source) {
        client.away = text.map(str::to_owned);
    }
    let line = match text {
        Some(text) => format!(":{source} AWAY :{text}"),
        None => format!(":{source} AWAY"),
    };
    mesh.propagate(None, Caps::TS6, Caps::none(), Some(from_link.clone()), line);
}

/// `:<uid> PART <channel> [:<reason>]`.
pub fn handle_part(
    mesh: &mut Mesh,
    from_link: &Sid,
    source: &Uid,
    name: &str,
    reason: Option<&str>,
) {
    let Some(chan) = mesh.channels.find(name) else {
        return;
    };
    let Some(mid) = mesh.find_membership(chan, source) else {
        return;
    };
    let src = {
        let channel = mesh.channels.get(chan);
        let Some(client) = mesh.registry.client(source) else {
            return;
        };
        source_ident(channel, &client.nick, &client.user, &client.host)
    };
    let line = match reason {
        Some(reason) => format!(":{src} PART {name} :{reason}"),
        None => format!(":{src} PART {name}"),
    };
    mesh.sendto_channel_local(chan, Audience::All, line);

    let wire = match reason {
        Some(reason) => format!(":{source} PART {name} :{reason}"),
        None => format!(":{source} PART {name}"),
    };
    mesh.propagate(
        Some(chan),
        Caps::TS6,
        Caps::none(),
        Some(from_link.clone()),
        wire,
    );

    let (chan, _, status) = mesh.remove_membership(mid);
    mesh.channel_emptied(chan, status.op);
    mesh.debug_check();
}

/// `:<uid> QUIT [:<reason>]`.
pub fn handle_quit(mesh: &mut Mesh, from_link: &Sid, source: &Uid, reason: Option<&str>) {
    let reason = reason.unwrap_or("Client Quit");
    split::remove_client(mesh, source, reason);
    mesh.propagate(
        None,
        Caps::TS6,
        Caps::none(),
        Some(from_link.clone()),
        format!(":{source} QUIT :{reason}"),
    );
    mesh.debug_check();
}

/// `:<src> SQUIT <server> :<reason>` — a remote subtree went away.
pub fn handle_squit(mesh: &mut Mesh, from_link: &Sid, server: &str, reason: &str) {
    let Some(sid) = mesh.registry.find_server_name(server).cloned() else {
        return;
    };
    split::remove_server_tree(mesh, &sid, Some(from_link), reason);
}

/// `:<sid> BMASK <channel-ts> <channel> <letter> :<masks>`.
///
/// Applied only when the timestamps agree; a mismatched BMASK is from a
/// side that already lost reconciliation.
pub fn handle_bmask(
    mesh: &mut Mesh,
    from_link: &Sid,
    source: &Sid,
    ts: i64,
    name: &str,
    letter: char,
    masks: &[String],
) {
    let Some(chan) = mesh.channels.find(name) else {
        return;
    };
    if mesh.channels.get(chan).ts != ts {
        return;
    }
    let set_by = mesh
        .registry
        .server(source)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| mesh.me.name.clone());
    let now = mesh.now();
    {
        let channel = mesh.channels.get_mut(chan);
        let Some(list) = channel.list_mut(letter) else {
            return;
        };
        for mask in masks {
            if list.iter().any(|e| e.mask == *mask) {
                continue;
            }
            list.push(ListEntry {
                mask: mask.clone(),
                set_by: set_by.clone(),
                set_at: now,
            });
        }
        channel.ban_serial += 1;
    }
    let line = format!(
        ":{source} BMASK {ts} {name} {letter} :{}",
        masks.join(" ")
    );
    mesh.propagate(
        Some(chan),
        Caps::TS6,
        Caps::none(),
        Some(from_link.clone()),
        line,
    );
}

/// `:<sid> TB <channel> <topic-ts> [<setter>] :<topic>` — topic burst.
/// The older topic wins; a tie keeps ours.
pub fn handle_tb(
    mesh: &mut Mesh,
    from_link: &Sid,
    source: &Sid,
    name: &str,
    ts: i64,
    setter: Option<&str>,
    text: &str,
) {
    let Some(chan) = mesh.channels.find(name) else {
        return;
    };
    let accept = match &mesh.channels.get(chan).topic {
        None => true,
        Some(topic) => ts < topic.set_at,
    };
    if !accept {
        return;
    }
    let source_name = mesh
        .registry
        .server(source)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| mesh.me.name.clone());
    let set_by = setter.unwrap_or(&source_name).to_owned();
    mesh.channels.get_mut(chan).topic = Some(crate::state::Topic {
        text: text.to_owned(),
        set_by: set_by.clone(),
        set_at: ts,
    });
    mesh.sendto_channel_local(
        chan,
        Audience::All,
        format!(":{source_name} TOPIC {name} :{text}"),
    );
    let wire = match setter {
        Some(setter) => format!(":{source} TB {name} {ts} {setter} :{text}"),
        None => format!(":{source} TB {name} {ts} :{text}"),
    };
    mesh.propagate(
        Some(chan),
        Caps::TS6,
        Caps::TB,
        Some(from_link.clone()),
        wire,
    );
}

/// `:<src> EOB [:<sid>]` — mark the burst finished for a server.
pub fn handle_eob(mesh: &mut Mesh, from_link: &Sid, source: &Sid, for_sid: Option<&str>) {
    let target = for_sid.map(Sid::new).unwrap_or_else(|| source.clone());
    if let Some(server) = mesh.registry.server_mut(&target) {
        server.sent_eob = true;
        debug!(server = %server.name, "end of burst");
    }
    let line = match for_sid {
        Some(for_sid) => format!(":{source} EOB :{for_sid}"),
        None => format!(":{source} EOB"),
    };
    mesh.propagate(None, Caps::TS6, Caps::none(), Some(from_link.clone()), line);
}

/// `:<src> MODE <channel> <modes> [args...]` from a peer: apply and
/// re-broadcast. Status and list arguments arrive as UIDs and masks.
pub fn handle_mode(
    mesh: &mut Mesh,
    from_link: &Sid,
    source_name: &str,
    wire_source: &str,
    name: &str,
    modes: &str,
    args: &[String],
) {
    let Some(chan) = mesh.channels.find(name) else {
        return;
    };
    let mut add = true;
    let mut arg_iter = args.iter();
    let mut local = ModeLineBuilder::new(source_name, name);
    let mut lists_changed = false;

    for c in modes.chars() {
        match c {
            '+' => add = true,
            '-' => add = false,
            'o' | 'v' => {
                let Some(arg) = arg_iter.next() else { break };
                let target = resolve_member_arg(mesh, arg);
                let Some(target) = target else { continue };
                let Some(mid) = mesh.find_membership(chan, &target) else {
                    continue;
                };
                if let Some(ms) = mesh.members.get_mut(mid) {
                    if c == 'o' {
                        ms.status.op = add;
                        if !add {
                            ms.status.uniq_op = false;
                        }
                    } else {
                        ms.status.voice = add;
                    }
                }
                let shown = {
                    let channel = mesh.channels.get(chan);
                    let nick = mesh
                        .registry
                        .client(&target)
                        .map(|cl| cl.nick.clone())
                        .unwrap_or_default();
                    visible_name(channel, &nick).to_owned()
                };
                local.push(add, c, Some(&shown));
            }
            'b' | 'e' | 'I' | 'R' => {
                let Some(mask) = arg_iter.next() else { break };
                let now = mesh.now();
                let set_by = source_name.to_owned();
                let channel = mesh.channels.get_mut(chan);
                let Some(list) = channel.list_mut(c) else { continue };
                if add {
                    if !list.iter().any(|e| e.mask == *mask) {
                        list.push(ListEntry {
                            mask: mask.clone(),
                            set_by,
                            set_at: now,
                        });
                    }
                } else {
                    list.retain(|e| e.mask != *mask);
                }
                lists_changed = true;
                local.push(add, c, Some(mask));
            }
            'k' => {
                let channel = mesh.channels.get_mut(chan);
                if add {
                    let Some(key) = arg_iter.next() else { break };
                    channel.modes.key = key.clone();
                    local.push(true, 'k', Some(key));
                } else {
                    let old = std::mem::take(&mut channel.modes.key);
                    // a -k may or may not carry the key argument
                    let _ = arg_iter.next();
                    local.push(false, 'k', Some(&old));
                }
            }
            'l' => {
                let channel = mesh.channels.get_mut(chan);
                if add {
                    let Some(arg) = arg_iter.next() else { break };
                    channel.modes.limit = arg.parse().unwrap_or(0);
                    local.push(true, 'l', Some(arg));
                } else {
                    channel.modes.limit = 0;
                    local.push(false, 'l', None);
                }
            }
            _ => {
                let Some(flag) = ModeFlags::from_letter(c) else {
                    continue;
                };
                let channel = mesh.channels.get_mut(chan);
                if add {
                    channel.modes.flags.insert(flag);
                } else {
                    channel.modes.flags.remove(flag);
                }
                local.push(add, c, None);
            }
        }
    }

    if lists_changed {
        mesh.channels.get_mut(chan).ban_serial += 1;
    }
    for line in local.finish() {
        mesh.sendto_channel_local(chan, Audience::All, line);
    }

    let mut wire = format!(":{wire_source} MODE {name} {modes}");
    for arg in args {
        wire.push(' ');
        wire.push_str(arg);
    }
    mesh.propagate(
        Some(chan),
        Caps::TS6,
        Caps::none(),
        Some(from_link.clone()),
        wire,
    );
    mesh.debug_check();
}

/// Resolve a MODE status argument, which may be a UID or a nick.
fn resolve_member_arg(mesh: &Mesh, arg: &str) -> Option<Uid> {
    if check_uid(arg) && mesh.registry.client(&Uid::new(arg)).is_some() {
        return Some(Uid::new(arg));
    }
    mesh.registry.find_nick(arg).cloned()
}

/// LUSERS-style census for a local client.
pub fn lusers(mesh: &mut Mesh, uid: &Uid) {
    let (local, global) = mesh.registry.client_counts();
    mesh.numeric(
        uid,
        Response::RPL_LOCALUSERS,
        &format!("{local} {local} :Current local users {local}, max {local}"),
    );
    mesh.numeric(
        uid,
        Response::RPL_GLOBALUSERS,
        &format!("{global} {global} :Current global users {global}, max {global}"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::membership::Status;

    fn test_mesh() -> Mesh {
        let config = Config::from_str(
            r#"
            [server]
            name = "hub.example.net"
            sid = "00A"
            description = "test"
            "#,
        )
        .unwrap();
        let mut mesh = Mesh::new(config);
        mesh.set_fixed_time(1_000);
        mesh
    }

    #[test]
    fn lusers_counts_local_and_global() {
        let mut mesh = test_mesh();
        let local = mesh.register_local_client("a", "a", "h");
        mesh.registry
            .add_server(crate::state::ServerRec {
                sid: Sid::new("00B"),
                name: "b.example.net".to_owned(),
                hopcount: 1,
                via: Some(mesh.me.sid.clone()),
                description: String::new(),
                realname: None,
                caps: Caps::all_supported(),
                sent_eob: true,
            })
            .unwrap();
        handle_uid(
            &mut mesh,
            &Sid::new("00B"),
            "remote",
            1,
            100,
            "+",
            "r",
            "r.example.com",
            "0",
            "00BAAAAAA",
            "remote user",
        )
        .unwrap();

        mesh.out.drain();
        lusers(&mut mesh, &local);
        let lines = mesh.out.client_lines(&local);
        assert!(lines.iter().any(|l| l.contains(" 265 ") && l.contains('1')), "{lines:?}");
        assert!(lines.iter().any(|l| l.contains(" 266 ") && l.contains('2')), "{lines:?}");
    }

    #[test]
    fn remote_mode_applies_and_rebroadcasts() {
        let mut mesh = test_mesh();
        let b = Sid::new("00B");
        mesh.registry
            .add_server(crate::state::ServerRec {
                sid: b.clone(),
                name: "b.example.net".to_owned(),
                hopcount: 1,
                via: Some(mesh.me.sid.clone()),
                description: String::new(),
                realname: None,
                caps: Caps::all_supported(),
                sent_eob: true,
            })
            .unwrap();
        let member = mesh.register_local_client("m", "m", "h");
        let chan = mesh.channels.allocate("#x");
        mesh.add_user_to_channel(chan, &member, Status::peon());
        mesh.out.drain();

        handle_mode(
            &mut mesh,
            &b,
            "b.example.net",
            "00B",
            "#x",
            "+ok",
            &[member.as_str().to_owned(), "sekrit".to_owned()],
        );

        let mid = mesh.find_membership(chan, &member).unwrap();
        assert!(mesh.members.get(mid).unwrap().status.op);
        assert_eq!(mesh.channels.get(chan).modes.key, "sekrit");

        let chan_lines = mesh.out.channel_lines(chan);
        assert!(
            chan_lines.iter().any(|l| l.contains("MODE #x +ok m sekrit")),
            "{chan_lines:?}"
        );
        let peer_lines = mesh.out.peer_lines();
        assert!(
            peer_lines.iter().any(|l| l.starts_with(":00B MODE #x +ok")),
            "{peer_lines:?}"
        );
    }
}
