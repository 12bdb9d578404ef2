//! The mesh context: every registry and store, one task, no globals.
//!
//! All command handling happens on a single task that owns a `Mesh`
//! exclusively; a command's effects are atomic with respect to every
//! other command. The network layer lives outside and only ever sees the
//! outbox.

use tracing::{error, warn};

use mesh_proto::{ChanPrefix, Response};

use crate::broadcast::{Audience, Outbox, Target};
use crate::caps::Caps;
use crate::config::Config;
use crate::error::LinkError;

use super::channel::Channel;
use super::client::{Client, ServerRec};
use super::ids::{Sid, Uid};
use super::membership::{BanCache, MemberArena, MemberId, Membership, Status};
use super::store::{ChanId, ChannelStore};
use super::uid::UidGenerator;

/// Our own identity, used as the source of server-originated lines.
#[derive(Debug, Clone)]
pub struct MeIdent {
    /// Server name.
    pub name: String,
    /// Server ID.
    pub sid: Sid,
    /// Description.
    pub description: String,
}

/// The single context value every handler operates on.
pub struct Mesh {
    /// Static configuration.
    pub config: Config,
    /// Our identity.
    pub me: MeIdent,
    /// Clients and servers.
    pub registry: super::registry::Registry,
    /// Channels.
    pub channels: ChannelStore,
    /// Memberships.
    pub members: MemberArena,
    /// Output accumulated during the current command.
    pub out: Outbox,
    /// UID allocation for local clients.
    pub uid_gen: UidGenerator,
    /// Whether the network currently counts as split.
    pub splitmode: bool,
    /// Fixed clock for tests; `None` means wall time.
    fixed_time: Option<i64>,
}

impl Mesh {
    /// Build a mesh from configuration, registering ourselves.
    pub fn new(config: Config) -> Mesh {
        let sid = Sid::new(config.server.sid.clone());
        let me = MeIdent {
            name: config.server.name.clone(),
            sid: sid.clone(),
            description: config.server.description.clone(),
        };
        let mut registry = super::registry::Registry::new(sid.clone());
        registry
            .add_server(ServerRec {
                sid: sid.clone(),
                name: me.name.clone(),
                hopcount: 0,
                via: None,
                description: me.description.clone(),
                realname: None,
                caps: Caps::all_supported(),
                sent_eob: true,
            })
            .unwrap_or_else(|_| unreachable!("fresh registry"));
        Mesh {
            me,
            registry,
            channels: ChannelStore::new(),
            members: MemberArena::new(),
            out: Outbox::default(),
            uid_gen: UidGenerator::new(sid),
            splitmode: false,
            fixed_time: None,
            config,
        }
    }

    /// Current time in seconds.
    pub fn now(&self) -> i64 {
        self.fixed_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    /// Pin the clock; tests drive chandelay with this.
    pub fn set_fixed_time(&mut self, t: i64) {
        self.fixed_time = Some(t);
    }

    // --- membership plumbing ---

    /// Find the membership joining `chan` and `uid`, if any.
    pub fn find_membership(&self, chan: ChanId, uid: &Uid) -> Option<MemberId> {
        self.channels
            .get(chan)
            .members
            .iter()
            .copied()
            .find(|mid| self.members.get(*mid).is_some_and(|m| &m.client == uid))
    }

    /// Whether the client is on the channel.
    pub fn is_member(&self, chan: ChanId, uid: &Uid) -> bool {
        self.find_membership(chan, uid).is_some()
    }

    /// Attach a client to a channel. The caller has already established
    /// that no membership exists. A join also releases the chandelay
    /// lock.
    pub fn add_user_to_channel(&mut self, chan: ChanId, uid: &Uid, status: Status) -> MemberId {
        let local = self
            .registry
            .client(uid)
            .is_some_and(|c| c.server == self.me.sid);
        let mid = self.members.insert(Membership {
            channel: chan,
            client: uid.clone(),
            status,
            cache: BanCache::default(),
        });
        let channel = self.channels.get_mut(chan);
        channel.members.push(mid);
        if local {
            channel.local_members.push(mid);
        }
        channel.chlock = None;
        if let Some(client) = self.registry.client_mut(uid) {
            client.channels.push(mid);
        }
        mid
    }

    /// Detach a membership from both sides of the graph. Returns the
    /// channel and the departing member's status; empty-channel policy is
    /// applied separately via [`Mesh::channel_emptied`].
    pub fn remove_membership(&mut self, mid: MemberId) -> (ChanId, Uid, Status) {
        let ms = self.members.remove(mid);
        let channel = self.channels.get_mut(ms.channel);
        channel.members.retain(|m| *m != mid);
        channel.local_members.retain(|m| *m != mid);
        if let Some(client) = self.registry.client_mut(&ms.client) {
            client.channels.retain(|m| *m != mid);
        }
        (ms.channel, ms.client, ms.status)
    }

    /// Apply the empty-channel policy after a departure. Returns `true`
    /// when the channel was destroyed.
    ///
    /// A `+` channel persists; a `!` channel is locked for its tripled
    /// window; a `#` or `&` channel is locked only when a chanop left and
    /// a delay is configured, and destroyed otherwise. Service channels
    /// are never destroyed.
    pub fn channel_emptied(&mut self, chan: ChanId, leaver_was_op: bool) -> bool {
        let now = self.now();
        let delay = self.config.channel.delay;
        let (empty, service, prefix) = {
            let c = self.channels.get(chan);
            (c.members.is_empty(), c.info.service, c.prefix())
        };
        if !empty || service {
            return false;
        }
        let keep_locked = match prefix {
            ChanPrefix::Modeless => return false,
            ChanPrefix::Safe => delay > 0,
            ChanPrefix::Global | ChanPrefix::Local => leaver_was_op && delay > 0,
        };
        if keep_locked {
            self.channels.get_mut(chan).chlock = Some(now);
            false
        } else {
            self.channels.destroy(chan);
            true
        }
    }

    // --- output helpers ---

    /// Queue a line to the local members of a channel. Recipients are
    /// resolved now; the delivery outlives any later destruction of the
    /// channel in the same command.
    pub fn sendto_channel_local(&mut self, chan: ChanId, audience: Audience, line: String) {
        let to: Vec<Uid> = self
            .channels
            .get(chan)
            .local_members
            .iter()
            .filter_map(|mid| self.members.get(*mid))
            .filter(|ms| audience.admits(ms.status))
            .map(|ms| ms.client.clone())
            .collect();
        self.out.push(Target::Channel { chan, audience, to }, line);
    }

    /// Queue a line to one local client.
    pub fn sendto_one(&mut self, uid: &Uid, line: String) {
        self.out.push(Target::Client(uid.clone()), line);
    }

    /// Queue a numeric reply to a local client. `tail` is everything
    /// after the client's nick, already rendered.
    pub fn numeric(&mut self, uid: &Uid, code: Response, tail: &str) {
        let nick = self
            .registry
            .client(uid)
            .map(|c| c.nick.clone())
            .unwrap_or_else(|| "*".to_owned());
        let line = format!(":{} {:03} {} {}", self.me.name, code.code(), nick, tail);
        self.sendto_one(uid, line);
    }

    /// Queue a numeric with the canonical text for its code.
    pub fn numeric_std(&mut self, uid: &Uid, code: Response, subject: &str) {
        self.numeric(uid, code, &format!("{} :{}", subject, code.text()));
    }

    /// Queue a line to peers, honouring channel propagation rules:
    /// server-local channels never leave this server.
    pub fn propagate(
        &mut self,
        chan: Option<ChanId>,
        caps: Caps,
        nocaps: Caps,
        exclude: Option<Sid>,
        line: String,
    ) {
        if let Some(chan) = chan {
            if self.channels.get(chan).prefix() == ChanPrefix::Local {
                return;
            }
        }
        self.out.push(
            Target::Peers {
                caps,
                nocaps,
                exclude,
            },
            line,
        );
    }

    /// Queue a line to one peer.
    pub fn send_to_peer(&mut self, peer: &Sid, line: String) {
        self.out.push(Target::Peer(peer.clone()), line);
    }

    /// Terminate a link: ERROR line to the peer plus an operator notice.
    pub fn reject_link(&mut self, peer: &Sid, err: &LinkError) {
        warn!(peer = %peer, error = %err, "dropping server link");
        let line = err.error_line();
        self.send_to_peer(peer, line);
    }

    // --- invariants ---

    /// Collect violations of the structural invariants. Empty means
    /// coherent.
    pub fn coherence_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let now = self.now();
        let delay = self.config.channel.delay;

        for (mid, ms) in self.members.iter() {
            if self.registry.client(&ms.client).is_none() {
                errors.push(format!("membership {mid} references unknown client {}", ms.client));
            }
            match self.channels.maybe(ms.channel) {
                Some(channel) if channel.members.contains(&mid) => {}
                Some(_) => {
                    errors.push(format!("membership {mid} missing from channel member list"));
                }
                None => {
                    errors.push(format!("membership {mid} references a destroyed channel"));
                }
            }
            if ms.status.uniq_op && !ms.status.op {
                errors.push(format!("membership {mid} has uniq-op without chanop"));
            }
        }

        for (id, channel) in self.channels.iter() {
            for mid in &channel.members {
                match self.members.get(*mid) {
                    Some(ms) if ms.channel == id => {}
                    _ => errors.push(format!(
                        "channel {} lists stale membership {mid}",
                        channel.name
                    )),
                }
            }
            let prefix = channel.prefix();
            if channel.members.is_empty()
                && matches!(prefix, ChanPrefix::Global | ChanPrefix::Safe)
                && !channel.info.service
                && !channel.has_history(now, delay)
            {
                errors.push(format!(
                    "empty channel {} is neither locked nor destroyed",
                    channel.name
                ));
            }
        }

        for client in self.registry.iter_clients() {
            for mid in &client.channels {
                match self.members.get(*mid) {
                    Some(ms) if ms.client == client.uid => {}
                    _ => errors.push(format!(
                        "client {} lists stale membership {mid}",
                        client.nick
                    )),
                }
            }
        }

        errors
    }

    /// Assert coherence in debug builds; log and carry on in release.
    pub fn debug_check(&self) {
        let errors = self.coherence_errors();
        if errors.is_empty() {
            return;
        }
        for e in &errors {
            error!(violation = %e, "state coherence violation");
        }
        debug_assert!(errors.is_empty(), "state coherence: {errors:?}");
    }

    // --- conveniences used across handlers ---

    /// The channel-facing display name of a client, anonymised on `+a`.
    pub fn member_display(&self, channel: &Channel, uid: &Uid) -> String {
        let nick = self
            .registry
            .client(uid)
            .map(|c| c.nick.as_str())
            .unwrap_or("*");
        crate::broadcast::visible_name(channel, nick).to_owned()
    }

    /// Register a locally connected client and return its UID.
    pub fn register_local_client(&mut self, nick: &str, user: &str, host: &str) -> Uid {
        let uid = self.uid_gen.next_uid();
        let client = Client {
            uid: uid.clone(),
            nick: nick.to_owned(),
            user: user.to_owned(),
            host: host.to_owned(),
            ip: "0".to_owned(),
            nick_ts: self.now(),
            umodes: "+".to_owned(),
            gecos: nick.to_owned(),
            server: self.me.sid.clone(),
            away: None,
            oper: false,
            secure: false,
            account: None,
            channels: Vec::new(),
            last_join: 0,
        };
        self.registry
            .add_client(client)
            .unwrap_or_else(|e| unreachable!("fresh uid collided: {e}"));
        uid
    }

    /// Visibility of a channel to a viewer, as a tagged value rather
    /// than a null-conflating test.
    pub fn visibility(&self, name: &str, viewer: &Uid) -> Visibility {
        let Some(chan) = self.channels.find(name) else {
            return Visibility::NotAChannel;
        };
        let channel = self.channels.get(chan);
        let flags = channel.modes.flags;
        if flags.contains(super::modes::ModeFlags::SECRET) && !self.is_member(chan, viewer) {
            Visibility::Secret
        } else if flags.contains(super::modes::ModeFlags::PRIVATE) && !self.is_member(chan, viewer)
        {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

/// What a viewer may learn about a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Fully visible.
    Public,
    /// Existence visible, contents hidden.
    Private,
    /// Hidden entirely.
    Secret,
    /// No such channel.
    NotAChannel,
}
