//! The burst: streaming our complete state to a freshly linked peer.
//!
//! Order matters: users first so SJOIN member tokens resolve, then each
//! channel with its lists and topic. Lines are chunked so nothing ever
//! exceeds the wire maximum; the header is replayed on every chunk.

use tracing::debug;

use mesh_proto::limits::BUFSIZE;
use mesh_proto::ChanPrefix;

use crate::caps::Caps;
use crate::state::channel::Channel;
use crate::state::{Mesh, Sid};

/// Longest burst line we will emit.
const CHUNK: usize = BUFSIZE - 3;

/// Stream users, channels, ban lists and topics to `peer`.
pub fn burst_to_peer(mesh: &mut Mesh, peer: &Sid) {
    let peer_caps = mesh
        .registry
        .server(peer)
        .map(|s| s.caps)
        .unwrap_or_default();
    let burst_away = mesh.config.channel.burst_away;

    // users: every client we know, introduced by its owning server
    let uid_lines: Vec<String> = mesh
        .registry
        .iter_clients()
        .flat_map(|c| {
            let mut lines = vec![format!(
                ":{} UID {} {} {} {} {} {} {} {} :{}",
                c.server,
                c.nick,
                hop_of(mesh, c) + 1,
                c.nick_ts,
                c.umodes,
                c.user,
                c.host,
                c.ip,
                c.uid,
                c.gecos
            )];
            if burst_away {
                if let Some(away) = &c.away {
                    lines.push(format!(":{} AWAY :{}", c.uid, away));
                }
            }
            lines
        })
        .collect();
    for line in uid_lines {
        mesh.send_to_peer(peer, line);
    }

    // channels
    let chan_ids: Vec<_> = mesh.channels.iter().map(|(id, _)| id).collect();
    for chan in chan_ids {
        let (lines, list_lines, tb_line) = {
            let channel = mesh.channels.get(chan);
            if !burstable(mesh, channel) {
                continue;
            }
            let sjoin = sjoin_lines(mesh, channel);
            let lists = bmask_lines(mesh, channel, peer_caps);
            let tb = topic_line(mesh, channel, peer_caps);
            (sjoin, lists, tb)
        };
        for line in lines {
            mesh.send_to_peer(peer, line);
        }
        for line in list_lines {
            mesh.send_to_peer(peer, line);
        }
        if let Some(line) = tb_line {
            mesh.send_to_peer(peer, line);
        }
    }

    debug!(peer = %peer, "burst complete");
}

fn hop_of(mesh: &Mesh, client: &crate::state::Client) -> u32 {
    mesh.registry
        .server(&client.server)
        .map(|s| s.hopcount)
        .unwrap_or(0)
}

/// Whether a channel is sent to peers at all.
fn burstable(mesh: &Mesh, channel: &Channel) -> bool {
    match channel.prefix() {
        ChanPrefix::Local => false,
        // empty modeless channels are not bursted; occupied ones are
        ChanPrefix::Modeless => !channel.members.is_empty(),
        _ => {
            if channel.members.is_empty() {
                // preserved empties only exist to keep the peer's
                // chandelay lock alive
                mesh.config.channel.delay > 0
            } else {
                true
            }
        }
    }
}

/// The SJOIN lines for one channel, chunked at the wire limit.
fn sjoin_lines(mesh: &Mesh, channel: &Channel) -> Vec<String> {
    let empty = channel.members.is_empty();
    let modes = if empty && channel.prefix() != ChanPrefix::Safe {
        "+".to_owned()
    } else {
        channel.modes.render(true)
    };
    let header = format!(
        ":{} SJOIN {} {} {} :",
        mesh.me.sid, channel.ts, channel.name, modes
    );

    if empty {
        // the placeholder keeps the channel locked on the peer
        return vec![format!("{header}.")];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    for mid in &channel.members {
        let Some(ms) = mesh.members.get(*mid) else {
            continue;
        };
        let token = format!("{}{}", ms.status.to_prefix().render(), ms.client);
        if !current.is_empty() && header.len() + current.len() + 1 + token.len() > CHUNK {
            lines.push(format!("{header}{current}"));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&token);
    }
    if !current.is_empty() {
        lines.push(format!("{header}{current}"));
    }
    lines
}

/// BMASK lines for the four ban-style lists, capability-gated, chunked.
fn bmask_lines(mesh: &Mesh, channel: &Channel, peer_caps: Caps) -> Vec<String> {
    if channel.prefix() == ChanPrefix::Modeless {
        return Vec::new();
    }
    if channel.members.is_empty() && channel.prefix() != ChanPrefix::Safe {
        return Vec::new();
    }

    let mut lines = Vec::new();
    for (letter, required) in [
        ('b', Caps::none()),
        ('e', Caps::EX),
        ('I', Caps::IE),
        ('R', Caps::RE),
    ] {
        if !peer_caps.contains(required) {
            continue;
        }
        let Some(list) = channel.list(letter) else {
            continue;
        };
        if list.is_empty() {
            continue;
        }
        let header = format!(
            ":{} BMASK {} {} {} :",
            mesh.me.sid, channel.ts, channel.name, letter
        );
        let mut current = String::new();
        for entry in list {
            if !current.is_empty() && header.len() + current.len() + 1 + entry.mask.len() > CHUNK {
                lines.push(format!("{header}{current}"));
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&entry.mask);
        }
        if !current.is_empty() {
            lines.push(format!("{header}{current}"));
        }
    }
    lines
}

/// The TB line for the channel's topic, when the peer speaks TB.
fn topic_line(mesh: &Mesh, channel: &Channel, peer_caps: Caps) -> Option<String> {
    if !peer_caps.contains(Caps::TB) {
        return None;
    }
    let topic = channel.topic.as_ref()?;
    Some(if mesh.config.channel.burst_topicwho {
        format!(
            ":{} TB {} {} {} :{}",
            mesh.me.sid, channel.name, topic.set_at, topic.set_by, topic.text
        )
    } else {
        format!(
            ":{} TB {} {} :{}",
            mesh.me.sid, channel.name, topic.set_at, topic.text
        )
    })
}
