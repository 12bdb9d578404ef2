//! Local JOIN behaviour: creation, admission control, `!` channels,
//! JOIN 0 and chandelay.

mod common;

use common::*;

use meshircd::handlers::join::{can_join, local_join};
use meshircd::state::membership::Status;
use meshircd::state::modes::ModeFlags;
use meshircd::state::ListEntry;
use mesh_proto::limits::CHIDLEN;

fn entry(mask: &str) -> ListEntry {
    ListEntry {
        mask: mask.to_owned(),
        set_by: "setter".to_owned(),
        set_at: 0,
    }
}

#[test]
fn creator_gets_chanop_and_fresh_modes() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    local_join(&mut mesh, &alice, "#new", None);

    let chan = mesh.channels.find("#new").expect("channel created");
    let channel = mesh.channels.get(chan);
    assert_eq!(channel.ts, NOW);
    assert!(channel.modes.flags.contains(ModeFlags::NO_EXTERNAL));
    assert!(channel.modes.flags.contains(ModeFlags::TOPIC_LIMIT));

    let ms = mesh.members.get(mesh.find_membership(chan, &alice).unwrap()).unwrap();
    assert!(ms.status.op);
    assert!(!ms.status.uniq_op);

    let chan_lines = mesh.out.channel_lines(chan);
    assert!(chan_lines.iter().any(|l| l.contains("JOIN :#new")));
    assert!(chan_lines.iter().any(|l| l.contains("MODE #new +nt")));

    let peer_lines = mesh.out.peer_lines();
    assert!(
        peer_lines
            .iter()
            .any(|l| l.starts_with(":00A SJOIN ") && l.contains("#new +nt :@")),
        "creator sjoin missing: {peer_lines:?}"
    );

    // topicless join still delivers NAMES
    let replies = mesh.out.client_lines(&alice);
    assert!(replies.iter().any(|l| l.contains(" 353 ")));
    assert!(replies.iter().any(|l| l.contains(" 366 ")));
    assert_coherent(&mesh);
}

#[test]
fn second_joiner_is_plain_and_propagates_as_join() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let bob = local_client(&mut mesh, "bob");
    local_join(&mut mesh, &alice, "#room", None);
    mesh.out.drain();
    local_join(&mut mesh, &bob, "#room", None);

    let chan = mesh.channels.find("#room").unwrap();
    let ms = mesh.members.get(mesh.find_membership(chan, &bob).unwrap()).unwrap();
    assert!(ms.status.is_plain());

    let peer_lines = mesh.out.peer_lines();
    assert!(
        peer_lines
            .iter()
            .any(|l| l.contains("JOIN") && l.contains("#room +") && !l.contains("SJOIN")),
        "plain join propagation missing: {peer_lines:?}"
    );
}

/// S4: `JOIN !!widgets` creates a `!` channel with a generated ID, the
/// creator holds both chanop and unique-op, peers see `@@`, and no +nt
/// MODE line is emitted.
#[test]
fn safe_channel_creation() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    local_join(&mut mesh, &alice, "!!widgets", None);

    let (chan, channel) = mesh
        .channels
        .iter()
        .find(|(_, c)| c.name.starts_with('!'))
        .expect("safe channel created");
    assert_eq!(channel.name.len(), 1 + CHIDLEN + "widgets".len());
    assert!(channel.name.ends_with("widgets"));
    assert_eq!(channel.shortname(), Some("widgets"));

    let ms = mesh.members.get(mesh.find_membership(chan, &alice).unwrap()).unwrap();
    assert!(ms.status.op && ms.status.uniq_op);

    let peer_lines = mesh.out.peer_lines();
    assert!(
        peer_lines.iter().any(|l| l.contains("SJOIN") && l.contains(":@@")),
        "unique-op sjoin missing: {peer_lines:?}"
    );

    let chan_lines = mesh.out.channel_lines(chan);
    assert!(
        !chan_lines.iter().any(|l| l.contains("MODE") && l.contains("+nt")),
        "safe channels must not get +nt: {chan_lines:?}"
    );
    assert_coherent(&mesh);
}

#[test]
fn safe_channel_join_by_shortname() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let bob = local_client(&mut mesh, "bob");
    local_join(&mut mesh, &alice, "!!widgets", None);
    mesh.out.drain();

    local_join(&mut mesh, &bob, "!widgets", None);
    let (chan, _) = mesh
        .channels
        .iter()
        .find(|(_, c)| c.name.starts_with('!'))
        .unwrap();
    assert!(mesh.is_member(chan, &bob));

    // a missing shortname is refused
    local_join(&mut mesh, &bob, "!nosuch", None);
    let replies = mesh.out.client_lines(&bob);
    assert!(replies.iter().any(|l| l.contains(" 403 ")), "{replies:?}");
}

#[test]
fn clashing_shortnames_are_refused() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let a = mesh.channels.allocate("!AAAAAwidgets");
    let b = mesh.channels.allocate("!BBBBBwidgets");
    mesh.channels.get_mut(a).chlock = Some(NOW);
    mesh.channels.get_mut(b).chlock = Some(NOW);
    mesh.out.drain();

    local_join(&mut mesh, &alice, "!widgets", None);
    let replies = mesh.out.client_lines(&alice);
    let clashes = replies.iter().filter(|l| l.contains(" 407 ")).count();
    assert_eq!(clashes, 2, "{replies:?}");
    assert!(mesh.registry.client(&alice).unwrap().channels.is_empty());
}

/// S3: JOIN 0 parts everything, propagates once.
#[test]
fn join_zero_parts_all() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let bob = local_client(&mut mesh, "bob");
    local_join(&mut mesh, &alice, "#a,#b,#c", None);
    local_join(&mut mesh, &bob, "#b", None);
    mesh.out.drain();

    local_join(&mut mesh, &alice, "0", None);

    assert!(mesh.registry.client(&alice).unwrap().channels.is_empty());
    // #a and #c had only alice, an op: locked under chandelay, empty
    let a = mesh.channels.find("#a").expect("locked, not destroyed");
    assert!(mesh.channels.get(a).members.is_empty());
    assert!(mesh.channels.get(a).chlock.is_some());
    // #b keeps bob
    let b = mesh.channels.find("#b").unwrap();
    assert_eq!(mesh.channels.get(b).members.len(), 1);

    let join_zero_lines: Vec<&str> = mesh
        .out
        .peer_lines()
        .into_iter()
        .filter(|l| l.ends_with("JOIN 0"))
        .collect();
    assert_eq!(join_zero_lines.len(), 1, "exactly one JOIN 0 propagation");

    let part_lines = all_lines(&mesh)
        .into_iter()
        .filter(|l| l.contains(" PART "))
        .count();
    assert_eq!(part_lines, 3);
    assert_coherent(&mesh);
}

#[test]
fn admission_numerics() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let joiner = local_client(&mut mesh, "joiner");
    local_join(&mut mesh, &alice, "#gate", None);
    let chan = mesh.channels.find("#gate").unwrap();

    {
        let channel = mesh.channels.get_mut(chan);
        channel.modes.flags.insert(ModeFlags::INVITE_ONLY);
    }
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, None),
        Err(mesh_proto::Response::ERR_INVITEONLYCHAN)
    );
    mesh.channels.get_mut(chan).modes.flags = ModeFlags::empty();

    mesh.channels.get_mut(chan).bans.push(entry("joiner!*@*"));
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, None),
        Err(mesh_proto::Response::ERR_BANNEDFROMCHAN)
    );
    mesh.channels.get_mut(chan).bans.clear();

    mesh.channels.get_mut(chan).modes.key = "tr0pical".to_owned();
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, None),
        Err(mesh_proto::Response::ERR_BADCHANNELKEY)
    );
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, Some("wrong")),
        Err(mesh_proto::Response::ERR_BADCHANNELKEY)
    );
    assert_eq!(can_join(&mut mesh, &joiner, chan, Some("tr0pical")), Ok(()));
    mesh.channels.get_mut(chan).modes.key.clear();

    mesh.channels.get_mut(chan).modes.limit = 1;
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, None),
        Err(mesh_proto::Response::ERR_CHANNELISFULL)
    );
    mesh.channels.get_mut(chan).modes.limit = 0;

    mesh.channels.get_mut(chan).modes.flags.insert(ModeFlags::SSL_ONLY);
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, None),
        Err(mesh_proto::Response::ERR_SSLONLYCHAN)
    );
    mesh.registry.client_mut(&joiner).unwrap().secure = true;
    assert_eq!(can_join(&mut mesh, &joiner, chan, None), Ok(()));
    mesh.channels.get_mut(chan).modes.flags = ModeFlags::empty();

    mesh.channels.get_mut(chan).modes.flags.insert(ModeFlags::REOP);
    assert_eq!(
        can_join(&mut mesh, &joiner, chan, None),
        Err(mesh_proto::Response::ERR_NEEDREGGEDNICK)
    );
    mesh.registry.client_mut(&joiner).unwrap().account = Some("joiner".to_owned());
    assert_eq!(can_join(&mut mesh, &joiner, chan, None), Ok(()));
}

#[test]
fn invite_overrides_ban_and_limit() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let joiner = local_client(&mut mesh, "joiner");
    local_join(&mut mesh, &alice, "#gate", None);
    let chan = mesh.channels.find("#gate").unwrap();

    {
        let channel = mesh.channels.get_mut(chan);
        channel.modes.flags.insert(ModeFlags::INVITE_ONLY);
        channel.bans.push(entry("joiner!*@*"));
        channel.modes.limit = 1;
        channel.invites.push(joiner.clone());
    }
    assert_eq!(can_join(&mut mesh, &joiner, chan, None), Ok(()));
}

#[test]
fn invex_satisfies_invite_only() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let joiner = local_client(&mut mesh, "joiner");
    local_join(&mut mesh, &alice, "#gate", None);
    let chan = mesh.channels.find("#gate").unwrap();
    {
        let channel = mesh.channels.get_mut(chan);
        channel.modes.flags.insert(ModeFlags::INVITE_ONLY);
        channel.invexes.push(entry("joiner!*@*"));
    }
    assert_eq!(can_join(&mut mesh, &joiner, chan, None), Ok(()));
}

/// The reop list lets a matching user through +l on an opless channel,
/// stamping the reop clock.
#[test]
fn reop_mask_overrides_limit_on_opless_channel() {
    let mut mesh = mesh();
    let seat = local_client(&mut mesh, "seat");
    let reopper = local_client(&mut mesh, "reopper");
    local_join(&mut mesh, &seat, "#full", None);
    let chan = mesh.channels.find("#full").unwrap();

    {
        let mid = mesh.find_membership(chan, &seat).unwrap();
        mesh.members.get_mut(mid).unwrap().status = Status::peon();
        let channel = mesh.channels.get_mut(chan);
        channel.modes.limit = 1;
        channel.reops.push(entry("reopper!*@*"));
    }
    assert_eq!(can_join(&mut mesh, &reopper, chan, None), Ok(()));
    assert!(mesh.channels.get(chan).reop_since.is_some());

    // with a chanop present the limit stands
    {
        let mid = mesh.find_membership(chan, &seat).unwrap();
        mesh.members.get_mut(mid).unwrap().status = Status::chanop();
        mesh.channels.get_mut(chan).reop_since = None;
    }
    assert_eq!(
        can_join(&mut mesh, &reopper, chan, None),
        Err(mesh_proto::Response::ERR_CHANNELISFULL)
    );
}

#[test]
fn chandelay_locks_and_expires() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    let bob = local_client(&mut mesh, "bob");
    local_join(&mut mesh, &alice, "#held", None);
    local_join(&mut mesh, &alice, "0", None);

    let chan = mesh.channels.find("#held").expect("held by chandelay");
    assert!(mesh.channels.get(chan).is_locked(NOW, 60));
    mesh.out.drain();

    // a join during the window is refused
    local_join(&mut mesh, &bob, "#held", None);
    let replies = mesh.out.client_lines(&bob);
    assert!(replies.iter().any(|l| l.contains(" 437 ")), "{replies:?}");
    assert!(!mesh.is_member(chan, &bob));

    // after expiry the sweep destroys it
    let destroyed = mesh.channels.sweep(NOW + 61, 60);
    assert_eq!(destroyed, vec!["#held".to_owned()]);
}

#[test]
fn reserved_names_are_refused() {
    let text = format!(
        "{}\n[[resv]]\nmask = \"#services*\"\nreason = \"juped\"\n",
        config_text()
    );
    let mut mesh = mesh_with(&text);
    let alice = local_client(&mut mesh, "alice");
    local_join(&mut mesh, &alice, "#services", None);
    let replies = mesh.out.client_lines(&alice);
    assert!(replies.iter().any(|l| l.contains(" 479 ")), "{replies:?}");
    assert!(mesh.channels.find("#services").is_none());
}

#[test]
fn splitmode_blocks_joins_when_configured() {
    let text = config_text().replace(
        "delay = 60",
        "delay = 60\nno_join_on_split = true",
    );
    let mut mesh = mesh_with(&text);
    mesh.splitmode = true;
    let alice = local_client(&mut mesh, "alice");

    local_join(&mut mesh, &alice, "#blocked", None);
    let replies = mesh.out.client_lines(&alice);
    assert!(replies.iter().any(|l| l.contains(" 437 ")), "{replies:?}");

    // server-local channels stay joinable during a split
    mesh.out.drain();
    local_join(&mut mesh, &alice, "&local", None);
    assert!(mesh.channels.find("&local").is_some());
}

#[test]
fn channel_cap_is_enforced() {
    let text = config_text().replace("delay = 60", "delay = 60\nmax_chans_per_user = 2");
    let mut mesh = mesh_with(&text);
    let alice = local_client(&mut mesh, "alice");
    local_join(&mut mesh, &alice, "#one,#two,#three", None);
    let replies = mesh.out.client_lines(&alice);
    assert!(replies.iter().any(|l| l.contains(" 405 ")), "{replies:?}");
    assert!(mesh.channels.find("#three").is_none());
    assert_eq!(mesh.registry.client(&alice).unwrap().channels.len(), 2);
}

#[test]
fn modeless_channels_grant_no_status() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    local_join(&mut mesh, &alice, "+flat", None);
    let chan = mesh.channels.find("+flat").unwrap();
    let ms = mesh.members.get(mesh.find_membership(chan, &alice).unwrap()).unwrap();
    assert!(ms.status.is_plain());
}

#[test]
fn bad_names_get_the_right_numerics() {
    let mut mesh = mesh();
    let alice = local_client(&mut mesh, "alice");
    local_join(&mut mesh, &alice, "#bad name", None);
    local_join(&mut mesh, &alice, "nochan", None);
    let replies = mesh.out.client_lines(&alice);
    assert!(replies.iter().any(|l| l.contains(" 479 ")), "{replies:?}");
    assert!(replies.iter().any(|l| l.contains(" 403 ")), "{replies:?}");
}
