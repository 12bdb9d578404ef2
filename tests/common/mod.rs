//! Shared fixtures: a mesh with a pinned clock, helper peers and users.

#![allow(dead_code)]

use meshircd::caps::Caps;
use meshircd::config::Config;
use meshircd::state::{Client, Mesh, ServerRec, Sid, Uid};

pub const NOW: i64 = 5_000;

pub fn config_text() -> String {
    r#"
        [server]
        name = "hub.example.net"
        sid = "00A"
        description = "test hub"

        [channel]
        delay = 60

        [[links]]
        name = "leaf.example.net"
        host = "*"
        password = "sekrit"

        [[hubs]]
        server = "*"
        host = "*"
    "#
    .to_owned()
}

pub fn mesh() -> Mesh {
    mesh_with(&config_text())
}

pub fn mesh_with(text: &str) -> Mesh {
    let config = Config::from_str(text).expect("test config parses");
    let mut mesh = Mesh::new(config);
    mesh.set_fixed_time(NOW);
    mesh
}

/// Register a directly connected peer server.
pub fn add_peer(mesh: &mut Mesh, sid: &str, name: &str) -> Sid {
    let sid = Sid::new(sid);
    mesh.registry
        .add_server(ServerRec {
            sid: sid.clone(),
            name: name.to_owned(),
            hopcount: 1,
            via: Some(mesh.me.sid.clone()),
            description: format!("{name} description"),
            realname: None,
            caps: Caps::all_supported(),
            sent_eob: true,
        })
        .expect("peer registers");
    sid
}

/// Register a client owned by a remote server.
pub fn add_remote_client(mesh: &mut Mesh, uid: &str, nick: &str) -> Uid {
    let uid = Uid::new(uid);
    mesh.registry
        .add_client(Client {
            uid: uid.clone(),
            nick: nick.to_owned(),
            user: nick.to_owned(),
            host: format!("{nick}.example.com"),
            ip: "0".to_owned(),
            nick_ts: 100,
            umodes: "+".to_owned(),
            gecos: nick.to_owned(),
            server: uid.sid(),
            away: None,
            oper: false,
            secure: false,
            account: None,
            channels: Vec::new(),
            last_join: 0,
        })
        .expect("remote client registers");
    uid
}

/// Register a locally connected client.
pub fn local_client(mesh: &mut Mesh, nick: &str) -> Uid {
    mesh.register_local_client(nick, nick, &format!("{nick}.example.com"))
}

/// All outbox lines, flattened for convenient assertions.
pub fn all_lines(mesh: &Mesh) -> Vec<String> {
    mesh.out.lines().iter().map(|l| l.line.clone()).collect()
}

pub fn assert_coherent(mesh: &Mesh) {
    let errors = mesh.coherence_errors();
    assert!(errors.is_empty(), "coherence violations: {errors:?}");
}
