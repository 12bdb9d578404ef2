//! Netsplit teardown and splitmode tracking.
//!
//! When a link dies, everything learnt through it dies with it: the
//! downstream servers, their users, and every membership those users
//! held. Remaining peers hear SQUITs and local members hear QUITs.

use tracing::{info, warn};

use crate::broadcast::{source_ident, Audience};
use crate::caps::Caps;
use crate::state::{Mesh, Sid, Uid};

/// Remove a client from the mesh, broadcasting its QUIT to local members
/// of its channels. Used by netsplits, remote QUITs and kills.
pub fn remove_client(mesh: &mut Mesh, uid: &Uid, reason: &str) {
    loop {
        let Some(&mid) = mesh.registry.client(uid).and_then(|c| c.channels.first()) else {
            break;
        };
        let Some(chan) = mesh.members.get(mid).map(|m| m.channel) else {
            break;
        };
        let src = {
            let channel = mesh.channels.get(chan);
            let Some(client) = mesh.registry.client(uid) else {
                break;
            };
            source_ident(channel, &client.nick, &client.user, &client.host)
        };
        mesh.sendto_channel_local(chan, Audience::All, format!(":{src} QUIT :{reason}"));
        let (chan, _, status) = mesh.remove_membership(mid);
        mesh.channel_emptied(chan, status.op);
    }
    mesh.registry.remove_client(uid);
}

/// Tear down a server and everything behind it.
///
/// `from_link` is the link the removal was learnt from (or the dead link
/// itself); remaining peers are told with SQUITs, deepest servers first
/// so no peer ever sees an orphaned introducer.
pub fn remove_server_tree(mesh: &mut Mesh, target: &Sid, from_link: Option<&Sid>, reason: &str) {
    let affected = mesh.registry.downstream_sids(target);
    if affected.is_empty() {
        return;
    }

    let users = mesh.registry.clients_of(&affected);
    info!(
        target = %target,
        servers = affected.len(),
        users = users.len(),
        "netsplit teardown"
    );

    for uid in &users {
        remove_client(mesh, uid, reason);
    }

    // deepest first: reverse of the discovery order
    for sid in affected.iter().rev() {
        if let Some(server) = mesh.registry.remove_server(sid) {
            let line = format!(":{} SQUIT {} :{}", mesh.me.sid, server.name, reason);
            mesh.propagate(None, Caps::TS6, Caps::none(), from_link.cloned(), line);
        }
    }

    update_splitmode(mesh);
    mesh.debug_check();
}

/// A directly connected peer dropped; its subtree goes with it.
pub fn peer_lost(mesh: &mut Mesh, peer: &Sid) {
    let remote_name = mesh
        .registry
        .server(peer)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| peer.as_str().to_owned());
    let reason = format!("{} {}", mesh.me.name, remote_name);
    remove_server_tree(mesh, peer, Some(peer), &reason);
}

/// Recompute the splitmode flag from current census against the
/// configured floor. Zero thresholds disable split detection.
pub fn update_splitmode(mesh: &mut Mesh) {
    let min_servers = mesh.config.channel.split_server_count;
    let min_users = mesh.config.channel.split_user_count;
    if min_servers == 0 && min_users == 0 {
        mesh.splitmode = false;
        return;
    }
    let servers = mesh.registry.server_count();
    let (_, users) = mesh.registry.client_counts();
    let split = servers < min_servers || users < min_users;
    if split != mesh.splitmode {
        if split {
            warn!(servers, users, "entering splitmode");
        } else {
            info!(servers, users, "leaving splitmode");
        }
        mesh.splitmode = split;
    }
}
