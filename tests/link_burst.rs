//! Link establishment, transit introduction, masking, bursts and
//! netsplit teardown.

mod common;

use common::*;

use meshircd::caps::Caps;
use meshircd::error::{CheckError, LinkError};
use meshircd::handlers::{dispatch_peer, server};
use meshircd::state::membership::Status;
use meshircd::state::Sid;
use meshircd::sync::{burst, handshake::LinkHandshake, split};
use mesh_proto::limits::BUFSIZE;
use mesh_proto::{Command, Message};

fn handshake(password: &str, sid: &str, caps: &[&str]) -> LinkHandshake {
    let mut hs = LinkHandshake::inbound("10.0.0.2".to_owned(), "10.0.0.2".to_owned(), false);
    hs.step(Command::Pass {
        password: password.to_owned(),
        sid: Some(sid.to_owned()),
    })
    .unwrap();
    hs.step(Command::Capab(caps.iter().map(|s| s.to_string()).collect()))
        .unwrap();
    hs.step(Command::Server {
        name: "leaf.example.net".to_owned(),
        hopcount: 1,
        description: "a leaf".to_owned(),
    })
    .unwrap();
    hs
}

const FULL_CAPS: &[&str] = &["TS6", "QS", "EX", "IE", "TB", "RE"];

#[test]
fn establish_registers_answers_and_ends_burst() {
    let mut mesh = mesh();
    let mut hs = handshake("sekrit", "42A", FULL_CAPS);

    let sid = server::establish(&mut mesh, &mut hs).expect("establishes");
    assert_eq!(sid, Sid::new("42A"));
    assert!(hs.password.is_none(), "password buffer must be wiped");

    let server = mesh.registry.server(&sid).expect("registered");
    assert_eq!(server.name, "leaf.example.net");
    assert_eq!(server.via.as_ref(), Some(&mesh.me.sid));
    assert!(server.caps.contains(Caps::TS6));

    let lines = all_lines(&mesh);
    assert!(lines.iter().any(|l| l == "PASS sekrit TS 6 :00A"), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("CAPAB :")), "{lines:?}");
    assert!(
        lines.iter().any(|l| l == "SERVER hub.example.net 1 :test hub"),
        "{lines:?}"
    );
    assert!(lines.iter().any(|l| l == ":00A EOB"), "{lines:?}");
}

#[test]
fn establish_rejects_bad_credentials() {
    let mut mesh = mesh();

    let mut hs = handshake("wrong", "42A", FULL_CAPS);
    let err = server::establish(&mut mesh, &mut hs).unwrap_err();
    assert_eq!(err, LinkError::Rejected(CheckError::InvalidPassword));
    assert_eq!(err.error_line(), "ERROR :Invalid password.");

    let mut hs = handshake("sekrit", "42A", &["EX", "IE"]);
    let err = server::establish(&mut mesh, &mut hs).unwrap_err();
    assert_eq!(err, LinkError::NonTs6);

    assert!(mesh.registry.server(&Sid::new("42A")).is_none());
}

#[test]
fn establish_rejects_duplicate_identities() {
    let mut mesh = mesh();
    add_peer(&mut mesh, "42A", "leaf.example.net");

    // same name over a second connection
    let mut hs = handshake("sekrit", "42B", FULL_CAPS);
    let err = server::establish(&mut mesh, &mut hs).unwrap_err();
    assert_eq!(err, LinkError::ServerExists("leaf.example.net".to_owned()));
}

/// S5: a link introducing an SID that already exists is cancelled; the
/// existing server is untouched.
#[test]
fn duplicate_sid_from_transit_drops_the_link() {
    let mut mesh = mesh();
    let b = add_peer(&mut mesh, "00B", "b.example.net");
    let c = add_peer(&mut mesh, "00C", "c.example.net");

    server::handle_sid(&mut mesh, &b, &b, "forty.example.net", 2, "42A", "forty")
        .expect("first introduction");

    let msg: Message = ":00C SID other.example.net 2 42A :dup".parse().unwrap();
    let err = dispatch_peer(&mut mesh, &c, msg).unwrap_err();
    assert_eq!(err, LinkError::SidExists("42A".to_owned()));
    assert_eq!(err.error_line(), "ERROR :SID 42A already exists");

    let existing = mesh.registry.server(&Sid::new("42A")).expect("intact");
    assert_eq!(existing.name, "forty.example.net");
}

#[test]
fn transit_introduction_reaches_other_peers() {
    let mut mesh = mesh();
    let b = add_peer(&mut mesh, "00B", "b.example.net");
    add_peer(&mut mesh, "00C", "c.example.net");
    mesh.out.drain();

    server::handle_sid(&mut mesh, &b, &b, "deep.example.net", 2, "00D", "deep server")
        .expect("introduction");

    let lines = all_lines(&mesh);
    assert!(
        lines
            .iter()
            .any(|l| l.contains("SID deep.example.net 3 00D")),
        "re-introduction missing: {lines:?}"
    );
    // capability inheritance from the introducer
    let deep = mesh.registry.server(&Sid::new("00D")).unwrap();
    assert_eq!(deep.via, Some(b.clone()));
    assert!(deep.caps.contains(Caps::TS6));
}

#[test]
fn hub_leaf_rules_gate_introductions() {
    let text = r#"
        [server]
        name = "hub.example.net"
        sid = "00A"
        description = "test hub"

        [[hubs]]
        server = "b.example.net"
        host = "*.example.net"

        [[hubs]]
        server = "b.example.net"
        host = "secret.example.net"
        leaf = true
    "#;
    let mut mesh = mesh_with(text);
    let b = add_peer(&mut mesh, "00B", "b.example.net");
    let c = add_peer(&mut mesh, "00C", "c.example.net");

    // allowed by the hub rule
    server::handle_sid(&mut mesh, &b, &b, "ok.example.net", 2, "00D", "ok").expect("hub rule");

    // no hub rule covers link c at all
    let err = server::handle_sid(&mut mesh, &c, &c, "other.example.net", 2, "00E", "x").unwrap_err();
    assert_eq!(err, LinkError::NoHubMask);

    // the leaf rule overrides the hub rule
    let err =
        server::handle_sid(&mut mesh, &b, &b, "secret.example.net", 2, "00F", "x").unwrap_err();
    assert_eq!(err, LinkError::LeafedServer);
}

#[test]
fn masked_introduction_carries_real_name_in_description() {
    let text = format!(
        r#"{}
        [[links]]
        name = "masked.example.net"
        password = "pw"
        mask = "*.hidden.example.net"
        "#,
        config_text()
    );
    let mut mesh = mesh_with(&text);
    let m = add_peer(&mut mesh, "00M", "masked.example.net");
    let b = add_peer(&mut mesh, "00B", "b.example.net");
    mesh.out.drain();

    server::introduce_server(&mut mesh, &m, &b);
    let lines = all_lines(&mesh);
    assert!(
        lines
            .iter()
            .any(|l| l.contains("SID *.hidden.example.net 2 00B :[b.example.net]")),
        "masked introduction wrong: {lines:?}"
    );
}

/// S6: a channel with ten thousand members bursts as a sequence of
/// bounded SJOIN lines with identical headers covering every member
/// exactly once, in order.
#[test]
fn burst_respects_the_size_bound() {
    let mut mesh = mesh();
    let chan = mesh.channels.allocate("#big");
    mesh.channels.get_mut(chan).ts = 1000;
    {
        let channel = mesh.channels.get_mut(chan);
        channel.modes.flags.insert(meshircd::state::modes::ModeFlags::NO_EXTERNAL);
        channel.modes.flags.insert(meshircd::state::modes::ModeFlags::TOPIC_LIMIT);
    }

    let mut expected = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let uid = mesh.register_local_client(&format!("u{i}"), "u", "example.com");
        mesh.add_user_to_channel(chan, &uid, Status::peon());
        expected.push(uid.as_str().to_owned());
    }

    let peer = add_peer(&mut mesh, "00Z", "peer.example.net");
    burst::burst_to_peer(&mut mesh, &peer);

    let sjoins: Vec<&str> = mesh
        .out
        .peer_lines()
        .into_iter()
        .filter(|l| l.contains(" SJOIN "))
        .collect();
    assert!(sjoins.len() > 1, "ten thousand members cannot fit one line");

    let header = ":00A SJOIN 1000 #big +nt :";
    let mut seen = Vec::with_capacity(10_000);
    for line in &sjoins {
        assert!(line.len() <= BUFSIZE - 3, "oversize burst line: {}", line.len());
        assert!(line.starts_with(header), "header not replayed: {line}");
        for token in line[header.len()..].split(' ') {
            seen.push(token.to_owned());
        }
    }
    assert_eq!(seen, expected, "member coverage must be exact and ordered");
}

#[test]
fn empty_channels_burst_with_placeholder_only_under_chandelay() {
    let mut mesh = mesh();
    let chan = mesh.channels.allocate("#idle");
    mesh.channels.get_mut(chan).ts = 1000;
    mesh.channels.get_mut(chan).chlock = Some(NOW);

    let peer = add_peer(&mut mesh, "00Z", "peer.example.net");
    burst::burst_to_peer(&mut mesh, &peer);
    let lines = all_lines(&mesh);
    assert!(
        lines.iter().any(|l| l == ":00A SJOIN 1000 #idle + :."),
        "placeholder burst missing: {lines:?}"
    );

    // without chandelay the empty channel is simply skipped
    let text = config_text().replace("delay = 60", "delay = 0");
    let mut mesh = mesh_with(&text);
    let chan = mesh.channels.allocate("#idle");
    mesh.channels.get_mut(chan).ts = 1000;
    let peer = add_peer(&mut mesh, "00Z", "peer.example.net");
    burst::burst_to_peer(&mut mesh, &peer);
    assert!(
        !all_lines(&mesh).iter().any(|l| l.contains("#idle")),
        "empty channel bursted without chandelay"
    );
}

#[test]
fn ban_lists_burst_capability_gated() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    meshircd::handlers::join::local_join(&mut mesh, &alice, "#b", None);
    let chan = mesh.channels.find("#b").unwrap();
    {
        let channel = mesh.channels.get_mut(chan);
        channel.ts = 1000;
        channel.bans.push(meshircd::state::ListEntry {
            mask: "*!*@bad.example.com".to_owned(),
            set_by: "alice".to_owned(),
            set_at: 0,
        });
        channel.excepts.push(meshircd::state::ListEntry {
            mask: "good!*@*".to_owned(),
            set_by: "alice".to_owned(),
            set_at: 0,
        });
    }
    mesh.out.drain();

    // a peer without EX only hears the plain ban list
    let peer = add_peer(&mut mesh, "00Z", "peer.example.net");
    if let Some(server) = mesh.registry.server_mut(&peer) {
        server.caps.clear(Caps::EX);
    }
    burst::burst_to_peer(&mut mesh, &peer);
    let lines = all_lines(&mesh);
    assert!(
        lines.iter().any(|l| l.contains("BMASK 1000 #b b :*!*@bad.example.com")),
        "{lines:?}"
    );
    assert!(
        !lines.iter().any(|l| l.contains("BMASK 1000 #b e ")),
        "except list bursted without EX: {lines:?}"
    );
}

#[test]
fn netsplit_tears_down_the_subtree() {
    let mut mesh = mesh();
    let b = add_peer(&mut mesh, "00B", "b.example.net");
    add_peer(&mut mesh, "00C", "c.example.net");
    server::handle_sid(&mut mesh, &b, &b, "deep.example.net", 2, "00D", "deep").unwrap();

    // a user on the deep server, member of a channel with a local user
    let alice = local_client(&mut mesh, "alice");
    meshircd::handlers::join::local_join(&mut mesh, &alice, "#s", None);
    let remote = add_remote_client(&mut mesh, "00DAAAAAA", "remote");
    let chan = mesh.channels.find("#s").unwrap();
    mesh.add_user_to_channel(chan, &remote, Status::peon());
    mesh.out.drain();

    split::peer_lost(&mut mesh, &b);

    assert!(mesh.registry.server(&Sid::new("00B")).is_none());
    assert!(mesh.registry.server(&Sid::new("00D")).is_none());
    assert!(mesh.registry.client(&remote).is_none());
    assert!(!mesh
        .channels
        .get(chan)
        .members
        .iter()
        .filter_map(|m| mesh.members.get(*m))
        .any(|m| m.client == remote));

    let lines = all_lines(&mesh);
    assert!(
        lines.iter().any(|l| l.contains("SQUIT deep.example.net")),
        "squit for the deep server missing: {lines:?}"
    );
    assert!(
        lines.iter().any(|l| l.contains("SQUIT b.example.net")),
        "squit for the direct peer missing: {lines:?}"
    );
    assert!(
        lines.iter().any(|l| l.contains("QUIT")),
        "local quit broadcast missing: {lines:?}"
    );
    assert_coherent(&mesh);
}

#[test]
fn eob_is_tracked_and_relayed() {
    let mut mesh = mesh();
    let b = add_peer(&mut mesh, "00B", "b.example.net");
    if let Some(server) = mesh.registry.server_mut(&b) {
        server.sent_eob = false;
    }
    let msg: Message = ":00B EOB".parse().unwrap();
    dispatch_peer(&mut mesh, &b, msg).unwrap();
    assert!(mesh.registry.server(&b).unwrap().sent_eob);
}
