//! Command dispatch for established peer links.

pub mod join;
pub mod misc;
pub mod server;
pub mod sjoin;

use tracing::debug;

use mesh_proto::{check_sid, check_uid, Command, Message};

use crate::error::LinkError;
use crate::state::{Mesh, Sid, Uid};

/// Route one message from an established peer into the core.
///
/// An `Err` is fatal for the link it arrived on: the caller sends the
/// ERROR line and tears the link down. Everything else is local to the
/// command.
pub fn dispatch_peer(mesh: &mut Mesh, from_link: &Sid, msg: Message) -> Result<(), LinkError> {
    let prefix = msg.prefix.as_deref();

    match msg.command {
        Command::Ping { origin, .. } => {
            let me_sid = mesh.me.sid.clone();
            let me_name = mesh.me.name.clone();
            mesh.send_to_peer(from_link, format!(":{me_sid} PONG {me_name} :{origin}"));
        }
        Command::Pong { .. } => {}
        Command::Error { text } => return Err(LinkError::Remote(text)),

        Command::Sid {
            name,
            hopcount,
            sid,
            description,
        } => {
            let source = prefix_sid(prefix, from_link);
            server::handle_sid(mesh, from_link, &source, &name, hopcount, &sid, &description)?;
        }
        Command::Uid {
            nick,
            hopcount,
            ts,
            umodes,
            user,
            host,
            ip,
            uid,
            gecos,
        } => {
            misc::handle_uid(
                mesh, from_link, &nick, hopcount, ts, &umodes, &user, &host, &ip, &uid, &gecos,
            )?;
        }
        Command::Sjoin {
            ts,
            channel,
            modes,
            args,
            members,
        } => {
            let source = prefix_sid(prefix, from_link);
            sjoin::sjoin(mesh, from_link, &source, ts, &channel, &modes, &args, &members);
        }
        Command::Join { ts, channel } => {
            let Some(source) = prefix_uid(prefix) else {
                return Err(LinkError::Malformed("JOIN without user prefix"));
            };
            sjoin::remote_join(mesh, from_link, &source, ts, &channel);
        }
        Command::JoinZero => {
            let Some(source) = prefix_uid(prefix) else {
                return Err(LinkError::Malformed("JOIN without user prefix"));
            };
            sjoin::remote_join_zero(mesh, from_link, &source);
        }
        Command::Bmask {
            ts,
            channel,
            letter,
            masks,
        } => {
            let source = prefix_sid(prefix, from_link);
            misc::handle_bmask(mesh, from_link, &source, ts, &channel, letter, &masks);
        }
        Command::Tb {
            channel,
            ts,
            setter,
            topic,
        } => {
            let source = prefix_sid(prefix, from_link);
            misc::handle_tb(mesh, from_link, &source, &channel, ts, setter.as_deref(), &topic);
        }
        Command::Mode {
            target,
            modes,
            args,
        } => {
            let (source_name, wire_source) = mode_source(mesh, prefix, from_link);
            misc::handle_mode(
                mesh,
                from_link,
                &source_name,
                &wire_source,
                &target,
                &modes,
                &args,
            );
        }
        Command::Part { channel, reason } => {
            let Some(source) = prefix_uid(prefix) else {
                return Err(LinkError::Malformed("PART without user prefix"));
            };
            misc::handle_part(mesh, from_link, &source, &channel, reason.as_deref());
        }
        Command::Quit { reason } => {
            let Some(source) = prefix_uid(prefix) else {
                return Err(LinkError::Malformed("QUIT without user prefix"));
            };
            misc::handle_quit(mesh, from_link, &source, reason.as_deref());
        }
        Command::Squit { server, reason } => {
            misc::handle_squit(mesh, from_link, &server, &reason);
        }
        Command::Away { text } => {
            let Some(source) = prefix_uid(prefix) else {
                return Err(LinkError::Malformed("AWAY without user prefix"));
            };
            misc::handle_away(mesh, from_link, &source, text.as_deref());
        }
        Command::Eob { for_sid } => {
            let source = prefix_sid(prefix, from_link);
            misc::handle_eob(mesh, from_link, &source, for_sid.as_deref());
        }
        other => {
            debug!(command = other.name(), "ignoring unhandled peer command");
        }
    }

    Ok(())
}

/// The source SID of a server-originated command; the direct link when
/// no prefix was given.
fn prefix_sid(prefix: Option<&str>, from_link: &Sid) -> Sid {
    match prefix {
        Some(p) if check_sid(p) => Sid::new(p),
        _ => from_link.clone(),
    }
}

/// The source UID of a user-originated command.
fn prefix_uid(prefix: Option<&str>) -> Option<Uid> {
    prefix.filter(|p| check_uid(p)).map(Uid::new)
}

/// MODE may come from a server or a user; resolve a display name and
/// keep the wire source verbatim for re-propagation.
fn mode_source(mesh: &Mesh, prefix: Option<&str>, from_link: &Sid) -> (String, String) {
    if let Some(uid) = prefix_uid(prefix) {
        if let Some(client) = mesh.registry.client(&uid) {
            return (client.nick.clone(), uid.as_str().to_owned());
        }
    }
    let sid = prefix_sid(prefix, from_link);
    let name = mesh
        .registry
        .server(&sid)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| mesh.me.name.clone());
    (name, sid.as_str().to_owned())
}
