//! Remote joins and the SJOIN merge: TS reconciliation, mode and status
//! survival, ban-list wipes, and re-propagation.

use tracing::{debug, info, warn};

use mesh_proto::limits::BUFSIZE;
use mesh_proto::{check_channel_name, ChanPrefix, SjoinMember};

use crate::broadcast::{source_ident, visible_name, Audience};
use crate::caps::Caps;
use crate::state::membership::Status;
use crate::state::modes::{mode_diff, parse_sjoin_modes, ModeLineBuilder, Modes};
use crate::state::store::ChanId;
use crate::state::{Mesh, Sid, Uid};

/// Longest SJOIN line we will emit; the header is replayed per chunk.
const SJOIN_CHUNK: usize = BUFSIZE - 3;

/// What the timestamp comparison decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsOutcome {
    /// Our modes and statuses survive.
    pub keep_ours: bool,
    /// The incoming modes and statuses survive.
    pub keep_new: bool,
}

/// Apply the TS rule to a channel, returning which side survives.
///
/// Lower TS wins. Zero is the force-merge sentinel: either side at zero
/// drags the channel to zero. Equal timestamps keep both sides and merge.
pub fn reconcile_ts(mesh: &mut Mesh, chan: ChanId, newts: i64, isnew: bool) -> TsOutcome {
    let mut outcome = TsOutcome {
        keep_ours: true,
        keep_new: true,
    };
    let channel = mesh.channels.get_mut(chan);
    let oldts = channel.ts;

    if isnew {
        channel.ts = newts;
    } else if newts == 0 || oldts == 0 {
        channel.ts = 0;
    } else if newts == oldts {
        // nothing to do
    } else if newts < oldts {
        outcome.keep_ours = false;
        channel.ts = newts;
    } else {
        outcome.keep_new = false;
    }

    // the TS=0 transition is loud: every local member and the operators
    if !isnew && newts == 0 && oldts != 0 {
        let name = mesh.channels.get(chan).name.clone();
        warn!(channel = %name, oldts, "channel forced to TS 0");
        let me = mesh.me.name.clone();
        mesh.sendto_channel_local(
            chan,
            Audience::All,
            format!(":{me} NOTICE {name} :*** Notice -- TS for {name} changed from {oldts} to 0"),
        );
    }

    outcome
}

/// Single-user remote JOIN: `:<uid> JOIN <ts> <channel> +`.
///
/// Performs TS reconciliation but touches nothing beyond what the rule
/// requires; in particular, ban lists survive.
pub fn remote_join(mesh: &mut Mesh, from_link: &Sid, source: &Uid, ts: i64, name: &str) {
    if !check_channel_name(name) || ChanPrefix::of(name).is_none() {
        return;
    }
    if name.starts_with('&') {
        return;
    }
    let Some((chan, isnew)) = mesh.channels.get_or_create(name) else {
        return;
    };

    let oldts = mesh.channels.get(chan).ts;
    let outcome = reconcile_ts(mesh, chan, ts, isnew);

    if !outcome.keep_ours {
        let source_server = server_display(mesh, &source.sid());
        remove_our_modes(mesh, chan);
        announce_ts_change(mesh, chan, oldts);
        apply_final_mode(mesh, chan, &source_server, Modes::default());
    }

    if !mesh.is_member(chan, source) {
        mesh.add_user_to_channel(chan, source, Status::peon());
        announce_join(mesh, chan, source);
    }

    let ts_now = mesh.channels.get(chan).ts;
    let line = format!(":{source} JOIN {ts_now} {name} +");
    mesh.propagate(
        Some(chan),
        Caps::TS6,
        Caps::none(),
        Some(from_link.clone()),
        line,
    );

    mesh.debug_check();
}

/// Remote JOIN 0 on behalf of a client.
pub fn remote_join_zero(mesh: &mut Mesh, from_link: &Sid, source: &Uid) {
    mesh.propagate(
        None,
        Caps::TS6,
        Caps::none(),
        Some(from_link.clone()),
        format!(":{source} JOIN 0"),
    );
    // same part-all walk a local JOIN 0 performs, without re-propagating
    loop {
        let Some(&mid) = mesh
            .registry
            .client(source)
            .and_then(|c| c.channels.first())
        else {
            break;
        };
        let Some(chan) = mesh.members.get(mid).map(|m| m.channel) else {
            break;
        };
        let (name, src) = {
            let channel = mesh.channels.get(chan);
            let Some(client) = mesh.registry.client(source) else {
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
}

/// The SJOIN merge itself.
#[allow(clippy::too_many_arguments)]
pub fn sjoin(
    mesh: &mut Mesh,
    from_link: &Sid,
    source: &Sid,
    ts: i64,
    name: &str,
    modes_str: &str,
    args: &[String],
    members: &[SjoinMember],
) {
    if !check_channel_name(name) || ChanPrefix::of(name).is_none() {
        return;
    }
    if name.starts_with('&') {
        return;
    }
    // a mode string that exhausts its arguments drops the whole SJOIN
    let Some(newmode) = parse_sjoin_modes(modes_str, args) else {
        return;
    };
    let Some((chan, isnew)) = mesh.channels.get_or_create(name) else {
        return;
    };

    let oldts = mesh.channels.get(chan).ts;
    let oldmode = mesh.channels.get(chan).modes.clone();
    let outcome = reconcile_ts(mesh, chan, ts, isnew);

    let final_mode = if !outcome.keep_new {
        oldmode.clone()
    } else if outcome.keep_ours {
        merge_modes(&newmode, &oldmode)
    } else {
        newmode
    };

    let source_server = server_display(mesh, source);

    if !outcome.keep_ours {
        remove_our_modes(mesh, chan);
        announce_ts_change(mesh, chan, oldts);
    }

    apply_final_mode(mesh, chan, &source_server, final_mode);

    let prop_modes = if modes_str != "0" && outcome.keep_new {
        mesh.channels.get(chan).modes.render(true)
    } else {
        "0".to_owned()
    };

    // member loop: attach unknowns, accumulate +o/+v batches, collect the
    // tokens to re-propagate
    let mut status_lines = ModeLineBuilder::new(&source_server, name);
    let mut prop_members: Vec<String> = Vec::new();
    let mut joins = 0usize;

    for member in members {
        let member_uid = Uid::new(member.uid.clone());
        let Some(owner) = mesh.registry.client(&member_uid).map(|c| c.server.clone()) else {
            continue;
        };
        // a user introduced behind a different link is a fake direction
        if mesh.registry.route_to(&owner).as_ref() != Some(from_link) {
            continue;
        }

        prop_members.push(if outcome.keep_new {
            format!("{}{}", member.status.render(), member_uid)
        } else {
            member_uid.to_string()
        });

        let mut fl = Status::from_prefix(member.status);
        if !outcome.keep_new {
            // their statuses are downgraded; chanops get the bounce mark
            fl = if fl.op {
                Status {
                    deopped: true,
                    ..Status::default()
                }
            } else {
                Status::peon()
            };
        }

        if !mesh.is_member(chan, &member_uid) {
            mesh.add_user_to_channel(chan, &member_uid, fl);
            announce_join(mesh, chan, &member_uid);
            joins += 1;

            if fl.op || fl.voice {
                let channel = mesh.channels.get(chan);
                let nick = mesh
                    .registry
                    .client(&member_uid)
                    .map(|c| c.nick.clone())
                    .unwrap_or_default();
                let shown = visible_name(channel, &nick).to_owned();
                if fl.op {
                    status_lines.push(true, 'o', Some(&shown));
                }
                if fl.voice {
                    status_lines.push(true, 'v', Some(&shown));
                }
            }
        }
    }

    for line in status_lines.finish() {
        mesh.sendto_channel_local(chan, Audience::All, line);
    }

    if joins == 0 {
        // nothing attached: a new channel vanishes again, an existing
        // empty one starts its delay window
        let now = mesh.now();
        let channel = mesh.channels.get_mut(chan);
        if channel.prefix() != ChanPrefix::Modeless && channel.members.is_empty() {
            channel.chlock = Some(now);
        }
        if isnew && mesh.channels.get(chan).members.is_empty() {
            mesh.channels.destroy(chan);
        }
        mesh.debug_check();
        return;
    }

    // re-propagate in chunks; the argv prefix is replayed per chunk
    let chan_ts = mesh.channels.get(chan).ts;
    let header = format!(":{source} SJOIN {chan_ts} {name} {prop_modes} :");
    let mut current = String::new();
    for token in &prop_members {
        if !current.is_empty() && header.len() + current.len() + 1 + token.len() > SJOIN_CHUNK {
            mesh.propagate(
                Some(chan),
                Caps::TS6,
                Caps::none(),
                Some(from_link.clone()),
                format!("{header}{current}"),
            );
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(token);
    }
    if !current.is_empty() {
        mesh.propagate(
            Some(chan),
            Caps::TS6,
            Caps::none(),
            Some(from_link.clone()),
            format!("{header}{current}"),
        );
    }

    // when we lost, every ban-style list goes, loudly, and the serial
    // bump invalidates cached verdicts
    if !outcome.keep_ours {
        remove_ban_lists(mesh, chan, &source_server);
    }

    info!(
        channel = %name,
        ts,
        keep_ours = outcome.keep_ours,
        keep_new = outcome.keep_new,
        joins,
        "sjoin merged"
    );
    mesh.debug_check();
}

/// Equal-TS mode merge: union the bitset, larger limit, smaller
/// non-empty key as the deterministic tiebreak.
fn merge_modes(new: &Modes, old: &Modes) -> Modes {
    let mut merged = new.clone();
    merged.flags = merged.flags.union(old.flags);
    merged.limit = merged.limit.max(old.limit);
    if merged.key.is_empty() {
        merged.key = old.key.clone();
    } else if !old.key.is_empty() && old.key < merged.key {
        merged.key = old.key.clone();
    }
    merged
}

/// Emit the minimal diff to `final_mode` and install it.
fn apply_final_mode(mesh: &mut Mesh, chan: ChanId, source: &str, final_mode: Modes) {
    let name = mesh.channels.get(chan).name.clone();
    let old = mesh.channels.get(chan).modes.clone();
    let changes = mode_diff(&old, &final_mode);
    if !changes.is_empty() {
        let mut builder = ModeLineBuilder::new(source, &name);
        builder.push_all(&changes);
        for line in builder.finish() {
            mesh.sendto_channel_local(chan, Audience::All, line);
        }
    }
    mesh.channels.get_mut(chan).modes = final_mode;
}

/// Strip every membership's op and voice, with batched `-o`/`-v` lines
/// from us.
pub fn remove_our_modes(mesh: &mut Mesh, chan: ChanId) {
    let name = mesh.channels.get(chan).name.clone();
    let mids: Vec<_> = mesh.channels.get(chan).members.clone();
    let me = mesh.me.name.clone();
    let mut builder = ModeLineBuilder::new(&me, &name);

    for mid in mids {
        let Some(ms) = mesh.members.get(mid) else {
            continue;
        };
        let uid = ms.client.clone();
        let (was_op, was_voice) = (ms.status.op, ms.status.voice);
        if !was_op && !was_voice {
            continue;
        }
        let shown = {
            let channel = mesh.channels.get(chan);
            mesh.member_display(channel, &uid)
        };
        if let Some(ms) = mesh.members.get_mut(mid) {
            ms.status.op = false;
            ms.status.uniq_op = false;
            ms.status.voice = false;
        }
        if was_op {
            builder.push(false, 'o', Some(&shown));
        }
        if was_voice {
            builder.push(false, 'v', Some(&shown));
        }
    }

    for line in builder.finish() {
        mesh.sendto_channel_local(chan, Audience::All, line);
    }
}

/// Wipe all four ban-style lists, broadcasting the removals in batches,
/// and bump the serial.
fn remove_ban_lists(mesh: &mut Mesh, chan: ChanId, source: &str) {
    let name = mesh.channels.get(chan).name.clone();
    for (letter, audience) in [
        ('b', Audience::All),
        ('e', Audience::ChanOps),
        ('I', Audience::ChanOps),
        ('R', Audience::ChanOps),
    ] {
        let entries = {
            let channel = mesh.channels.get_mut(chan);
            match channel.list_mut(letter) {
                Some(list) => std::mem::take(list),
                None => continue,
            }
        };
        if entries.is_empty() {
            continue;
        }
        let mut builder = ModeLineBuilder::new(source, &name);
        for entry in &entries {
            builder.push(false, letter, Some(&entry.mask));
        }
        for line in builder.finish() {
            mesh.sendto_channel_local(chan, audience, line);
        }
    }
    mesh.channels.get_mut(chan).ban_serial += 1;
    debug!(channel = %name, "ban lists cleared after ts loss");
}

fn announce_ts_change(mesh: &mut Mesh, chan: ChanId, oldts: i64) {
    let channel = mesh.channels.get(chan);
    let name = channel.name.clone();
    let newts = channel.ts;
    let me = mesh.me.name.clone();
    mesh.sendto_channel_local(
        chan,
        Audience::All,
        format!(":{me} NOTICE {name} :*** Notice -- TS for {name} changed from {oldts} to {newts}"),
    );
}

fn announce_join(mesh: &mut Mesh, chan: ChanId, uid: &Uid) {
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
}

fn server_display(mesh: &Mesh, sid: &Sid) -> String {
    mesh.registry
        .server(sid)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| mesh.me.name.clone())
}
