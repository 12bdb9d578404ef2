//! Server link establishment and transit-server introduction.

use subtle::ConstantTimeEq;
use tracing::{info, warn};

use mesh_proto::limits::HOSTLEN;
use mesh_proto::{check_sid, valid_servername, wildcard_match};

use crate::caps::Caps;
use crate::config::{Config, LinkBlock};
use crate::error::{CheckError, LinkError};
use crate::state::{Mesh, ServerRec, Sid};
use crate::sync::burst;
use crate::sync::handshake::LinkHandshake;

/// Authenticate an unregistered SERVER against the link blocks.
///
/// Walks every block whose name mask covers the peer, remembering the
/// most specific failure seen, exactly so a host mismatch is reported as
/// such rather than as a missing block.
pub fn check_server<'a>(
    config: &'a Config,
    name: &str,
    host: &str,
    sockhost: &str,
    password: Option<&str>,
    secure: bool,
) -> Result<&'a LinkBlock, CheckError> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        return Err(CheckError::InvalidPassword);
    };
    if name.len() > HOSTLEN {
        return Err(CheckError::InvalidServerName);
    }

    let mut error = CheckError::NoLinkBlock;
    let mut found = None;
    for block in &config.links {
        if !wildcard_match(&block.name, name) {
            continue;
        }
        error = CheckError::InvalidHost;
        if !wildcard_match(&block.host, host) && !wildcard_match(&block.host, sockhost) {
            continue;
        }
        error = CheckError::InvalidPassword;
        let ok = if block.password_is_hash {
            bcrypt::verify(password, &block.password).unwrap_or(false)
        } else {
            constant_time_eq(password, &block.password)
        };
        if ok {
            found = Some(block);
            break;
        }
    }

    let Some(block) = found else {
        return Err(error);
    };
    if block.require_tls && !secure {
        return Err(CheckError::NeedsTls);
    }
    Ok(block)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Promote a completed handshake into a registered peer: authenticate,
/// reject duplicates, answer the handshake, register, introduce, burst.
///
/// On success the peer's SID is returned; on failure the caller sends
/// the ERROR line and closes.
pub fn establish(mesh: &mut Mesh, hs: &mut LinkHandshake) -> Result<Sid, LinkError> {
    let name = hs.name.clone().ok_or(LinkError::Malformed("SERVER"))?;
    if !valid_servername(&name) {
        warn!(peer = %name, host = %hs.host, "invalid servername in handshake");
        return Err(LinkError::InvalidServerName);
    }

    let block = match check_server(
        &mesh.config,
        &name,
        &hs.host,
        &hs.sockhost,
        hs.password.as_ref().map(|p| p.as_str()),
        hs.secure,
    ) {
        Ok(block) => block.clone(),
        Err(err) => {
            warn!(peer = %name, host = %hs.host, reason = %err, "unauthorised server connection attempt");
            return Err(LinkError::Rejected(err));
        }
    };

    // TS6 is mandatory on direct links
    if !hs.caps.contains(Caps::TS6) {
        warn!(peer = %name, caps = %hs.caps, "link dropped, TS6 required");
        return Err(LinkError::NonTs6);
    }

    let sid = hs.sid.clone().ok_or(LinkError::InvalidSid)?;
    if !check_sid(sid.as_str()) {
        return Err(LinkError::InvalidSid);
    }

    if mesh.registry.server_exists(&name, None).is_some() {
        warn!(peer = %name, "attempt to re-introduce server");
        return Err(LinkError::ServerExists(name));
    }
    if mesh.registry.server(&sid).is_some() {
        warn!(peer = %name, sid = %sid, "attempt to re-introduce sid");
        return Err(LinkError::SidExists(sid.as_str().to_owned()));
    }

    // a configured leaf carries one link, never two
    if !mesh.config.server.hub && !mesh.registry.direct_peers().is_empty() {
        return Err(LinkError::LeafNotHub);
    }

    let mut caps = hs.caps;
    if !block.topic_burst {
        caps.clear(Caps::TB);
    }
    if !block.compressed {
        caps.clear(Caps::ZIP);
    }

    // the inbound side answers with its own credentials now; the
    // outbound side already sent them when it connected
    if !hs.outbound {
        let me_sid = mesh.me.sid.clone();
        mesh.send_to_peer(
            &sid,
            format!("PASS {} TS 6 :{}", block.send_password(), me_sid),
        );
        mesh.send_to_peer(
            &sid,
            format!("CAPAB :{}", Caps::all_supported()),
        );
        let shown = block.mask.clone().unwrap_or_else(|| mesh.me.name.clone());
        let desc = if shown != mesh.me.name && !mesh.config.server.hidden {
            format!("[{}]{}", mesh.me.name, mesh.me.description)
        } else {
            mesh.me.description.clone()
        };
        mesh.send_to_peer(&sid, format!("SERVER {shown} 1 :{desc}"));
    }

    // done with the shared secret; wipe it
    hs.password = None;

    let (description, realname) = split_gecos(&name, &hs.description);
    mesh.registry
        .add_server(ServerRec {
            sid: sid.clone(),
            name: name.clone(),
            hopcount: hs.hopcount,
            via: Some(mesh.me.sid.clone()),
            description,
            realname,
            caps,
            sent_eob: false,
        })
        .map_err(|_| LinkError::ServerExists(name.clone()))?;

    info!(peer = %name, sid = %sid, caps = %caps, "link established");

    // the new server, to everyone else
    for peer in mesh.registry.direct_peers() {
        if peer != sid {
            introduce_server(mesh, &peer, &sid);
        }
    }

    // everyone we know, to the new server (nothing was learnt from it yet)
    let known: Vec<Sid> = mesh
        .registry
        .iter_servers()
        .filter(|s| s.sid != mesh.me.sid && s.sid != sid)
        .map(|s| s.sid.clone())
        .collect();
    for server in known {
        introduce_server(mesh, &sid, &server);
    }

    if block.burst {
        burst::burst_to_peer(mesh, &sid);
    }

    // relay EOB for already-synced servers; ours when there is none
    let synced: Vec<String> = mesh
        .registry
        .iter_servers()
        .filter(|s| s.sid != mesh.me.sid && s.sid != sid && s.sent_eob)
        .map(|s| s.sid.as_str().to_owned())
        .collect();
    let me_sid = mesh.me.sid.clone();
    if synced.is_empty() {
        mesh.send_to_peer(&sid, format!(":{me_sid} EOB"));
    } else {
        for other in synced {
            mesh.send_to_peer(&sid, format!(":{me_sid} EOB :{other}"));
        }
    }

    Ok(sid)
}

/// A transit server arriving over an established link:
/// `:<src> SID <name> <hopcount> <sid> :[<realname>]<desc>`.
pub fn handle_sid(
    mesh: &mut Mesh,
    from_link: &Sid,
    source: &Sid,
    name: &str,
    hopcount: u32,
    sid_str: &str,
    description: &str,
) -> Result<(), LinkError> {
    let from_name = mesh
        .registry
        .server(from_link)
        .map(|s| s.name.clone())
        .unwrap_or_default();

    if mesh
        .registry
        .server_exists(name, Some(&from_name))
        .is_some()
    {
        warn!(link = %from_name, server = name, "link cancelled, server already exists");
        return Err(LinkError::ServerExists(name.to_owned()));
    }
    let sid = Sid::new(sid_str);
    if mesh.registry.server(&sid).is_some() {
        warn!(link = %from_name, sid = %sid, "link cancelled, sid already exists");
        return Err(LinkError::SidExists(sid_str.to_owned()));
    }
    if !valid_servername(name) || name.len() > HOSTLEN {
        warn!(link = %from_name, server = name, "link cancelled, servername invalid");
        return Err(LinkError::InvalidServerName);
    }
    if !check_sid(sid_str) {
        warn!(link = %from_name, sid = sid_str, "link cancelled, sid invalid");
        return Err(LinkError::InvalidSid);
    }

    // hub/leaf gating: the direct link needs a hub rule covering the new
    // name and must not hit a leaf rule
    let mut hub_ok = false;
    let mut leafed = false;
    for rule in &mesh.config.hubs {
        if wildcard_match(&rule.server, &from_name) && wildcard_match(&rule.host, name) {
            if rule.leaf {
                leafed = true;
            } else {
                hub_ok = true;
            }
        }
    }
    if !hub_ok {
        warn!(link = %from_name, server = name, "non-hub link introduced a server");
        return Err(LinkError::NoHubMask);
    }
    if leafed {
        warn!(link = %from_name, server = name, "link introduced a leafed server");
        return Err(LinkError::LeafedServer);
    }

    let introducer_caps = mesh
        .registry
        .server(source)
        .map(|s| s.caps)
        .unwrap_or_default();
    let (description, realname) = split_gecos(name, description);
    mesh.registry
        .add_server(ServerRec {
            sid: sid.clone(),
            name: name.to_owned(),
            hopcount,
            via: Some(source.clone()),
            description,
            realname,
            caps: introducer_caps,
            sent_eob: false,
        })
        .map_err(|_| LinkError::ServerExists(name.to_owned()))?;

    info!(server = name, sid = %sid, via = %source, "server introduced");

    for peer in mesh.registry.direct_peers() {
        if &peer != from_link {
            introduce_server(mesh, &peer, &sid);
        }
    }

    Ok(())
}

/// Send one SID line describing `server` to `to`, applying the link's
/// configured name masking and carrying the real name bracketed in the
/// description.
pub fn introduce_server(mesh: &mut Mesh, to: &Sid, server: &Sid) {
    let Some(rec) = mesh.registry.server(server) else {
        return;
    };
    let source = rec.via.clone().unwrap_or_else(|| mesh.me.sid.clone());
    let to_name = mesh
        .registry
        .server(to)
        .map(|s| s.name.clone())
        .unwrap_or_default();

    let mask = mesh
        .config
        .link_for(&to_name)
        .and_then(|block| block.mask.clone());
    let (shown, masked_here) = match mask {
        Some(mask) if mask != rec.name => (mask, true),
        _ => (rec.name.clone(), false),
    };

    let desc = if let Some(realname) = &rec.realname {
        format!("[{}]{}", realname, rec.description)
    } else if masked_here && !mesh.config.server.hidden {
        format!("[{}]{}", rec.name, rec.description)
    } else {
        rec.description.clone()
    };

    let line = format!(
        ":{} SID {} {} {} :{}",
        source,
        shown,
        rec.hopcount + 1,
        rec.sid,
        desc
    );
    mesh.send_to_peer(to, line);
}

/// Split a `[realname]description` gecos. The bracketed name is kept
/// only when the outer (possibly masked) name covers it.
pub fn split_gecos(name: &str, gecos: &str) -> (String, Option<String>) {
    if let Some(rest) = gecos.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let realname = &rest[..end];
            if realname.len() <= HOSTLEN {
                let description = rest[end + 1..].trim_start().to_owned();
                if wildcard_match(name, realname) {
                    return (description, Some(realname.to_owned()));
                }
                return (description, None);
            }
        }
    }
    (gecos.to_owned(), None)
}
