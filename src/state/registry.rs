//! The identifier registry.
//!
//! A weak index over clients and servers: lookups by nick, UID, server
//! name and SID, with mesh-wide uniqueness enforced at insertion. The
//! registry owns the records; channels are owned by the channel store.

use std::collections::HashMap;

use mesh_proto::{irc_to_lower, wildcard_match};

use super::client::{Client, ServerRec};
use super::ids::{Sid, Uid};

/// Client and server registries with uniqueness enforcement.
#[derive(Debug)]
pub struct Registry {
    clients: HashMap<Uid, Client>,
    nicks: HashMap<String, Uid>,
    servers: HashMap<Sid, ServerRec>,
    server_names: HashMap<String, Sid>,
    /// Our own SID, for local/remote classification.
    me: Sid,
}

impl Registry {
    /// Registry for a mesh where we are `me`.
    pub fn new(me: Sid) -> Registry {
        Registry {
            clients: HashMap::new(),
            nicks: HashMap::new(),
            servers: HashMap::new(),
            server_names: HashMap::new(),
            me,
        }
    }

    // --- clients ---

    /// Register a client. Fails when the UID or the nick is taken.
    pub fn add_client(&mut self, client: Client) -> Result<(), &'static str> {
        if self.clients.contains_key(&client.uid) {
            return Err("duplicate uid");
        }
        let nick_key = irc_to_lower(&client.nick);
        if self.nicks.contains_key(&nick_key) {
            return Err("duplicate nick");
        }
        self.nicks.insert(nick_key, client.uid.clone());
        self.clients.insert(client.uid.clone(), client);
        Ok(())
    }

    /// Remove a client, returning its record.
    pub fn remove_client(&mut self, uid: &Uid) -> Option<Client> {
        let client = self.clients.remove(uid)?;
        self.nicks.remove(&irc_to_lower(&client.nick));
        Some(client)
    }

    /// Borrow a client.
    pub fn client(&self, uid: &Uid) -> Option<&Client> {
        self.clients.get(uid)
    }

    /// Borrow a client mutably.
    pub fn client_mut(&mut self, uid: &Uid) -> Option<&mut Client> {
        self.clients.get_mut(uid)
    }

    /// Look a client up by nickname.
    pub fn find_nick(&self, nick: &str) -> Option<&Uid> {
        self.nicks.get(&irc_to_lower(nick))
    }

    /// Iterate all clients.
    pub fn iter_clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// UIDs of every client owned by any of the given servers.
    pub fn clients_of(&self, sids: &[Sid]) -> Vec<Uid> {
        self.clients
            .values()
            .filter(|c| sids.contains(&c.server))
            .map(|c| c.uid.clone())
            .collect()
    }

    /// Local and global client counts, for LUSERS.
    pub fn client_counts(&self) -> (usize, usize) {
        let local = self
            .clients
            .values()
            .filter(|c| c.server == self.me)
            .count();
        (local, self.clients.len())
    }

    // --- servers ---

    /// Register a server. Fails when the name or the SID is taken.
    pub fn add_server(&mut self, server: ServerRec) -> Result<(), &'static str> {
        if self.servers.contains_key(&server.sid) {
            return Err("duplicate sid");
        }
        let name_key = irc_to_lower(&server.name);
        if self.server_names.contains_key(&name_key) {
            return Err("duplicate server name");
        }
        self.server_names.insert(name_key, server.sid.clone());
        self.servers.insert(server.sid.clone(), server);
        Ok(())
    }

    /// Remove a server, returning its record.
    pub fn remove_server(&mut self, sid: &Sid) -> Option<ServerRec> {
        let server = self.servers.remove(sid)?;
        self.server_names.remove(&irc_to_lower(&server.name));
        Some(server)
    }

    /// Borrow a server.
    pub fn server(&self, sid: &Sid) -> Option<&ServerRec> {
        self.servers.get(sid)
    }

    /// Borrow a server mutably.
    pub fn server_mut(&mut self, sid: &Sid) -> Option<&mut ServerRec> {
        self.servers.get_mut(sid)
    }

    /// Exact server lookup by name.
    pub fn find_server_name(&self, name: &str) -> Option<&Sid> {
        self.server_names.get(&irc_to_lower(name))
    }

    /// Wildcard-aware duplicate check: a stored name and the candidate
    /// are compared as masks of each other, so `*.example.net` collides
    /// with `leaf.example.net` in either direction. A link re-presenting
    /// its own name is not a collision.
    pub fn server_exists(&self, name: &str, from: Option<&str>) -> Option<&ServerRec> {
        self.servers.values().find(|s| {
            if let Some(from) = from {
                if mesh_proto::irc_eq(from, name) {
                    return false;
                }
            }
            wildcard_match(&s.name, name) || wildcard_match(name, &s.name)
        })
    }

    /// Iterate all servers.
    pub fn iter_servers(&self) -> impl Iterator<Item = &ServerRec> {
        self.servers.values()
    }

    /// Number of known servers, ourselves included.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// The target server plus everything introduced through it, in
    /// discovery order. Used for netsplit teardown.
    pub fn downstream_sids(&self, target: &Sid) -> Vec<Sid> {
        let mut out = Vec::new();
        let mut queue = vec![target.clone()];
        while let Some(current) = queue.pop() {
            if out.contains(&current) {
                continue;
            }
            out.push(current.clone());
            for server in self.servers.values() {
                if server.via.as_ref() == Some(&current) && !out.contains(&server.sid) {
                    queue.push(server.sid.clone());
                }
            }
        }
        out
    }

    /// The directly connected peer a server is reached through.
    /// `None` for ourselves or for unknown servers.
    pub fn route_to(&self, sid: &Sid) -> Option<Sid> {
        let mut current = sid.clone();
        loop {
            let server = self.servers.get(&current)?;
            match &server.via {
                None => return None,
                Some(via) if *via == self.me => return Some(current),
                Some(via) => current = via.clone(),
            }
        }
    }

    /// SIDs of directly connected peers.
    pub fn direct_peers(&self) -> Vec<Sid> {
        self.servers
            .values()
            .filter(|s| s.via.as_ref() == Some(&self.me))
            .map(|s| s.sid.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Caps;

    fn server(sid: &str, name: &str, via: Option<&str>) -> ServerRec {
        ServerRec {
            sid: Sid::new(sid),
            name: name.to_owned(),
            hopcount: 1,
            via: via.map(Sid::new),
            description: String::new(),
            realname: None,
            caps: Caps::default(),
            sent_eob: false,
        }
    }

    #[test]
    fn duplicate_sid_is_rejected() {
        let mut reg = Registry::new(Sid::new("00A"));
        reg.add_server(server("42A", "leaf.example.net", Some("00A")))
            .unwrap();
        assert!(reg
            .add_server(server("42A", "other.example.net", Some("00A")))
            .is_err());
    }

    #[test]
    fn downstream_traversal() {
        // 00A (us) -> 00B -> 00C -> 00D, plus 00E behind us directly
        let mut reg = Registry::new(Sid::new("00A"));
        reg.add_server(server("00A", "us.example.net", None)).unwrap();
        reg.add_server(server("00B", "b.example.net", Some("00A"))).unwrap();
        reg.add_server(server("00C", "c.example.net", Some("00B"))).unwrap();
        reg.add_server(server("00D", "d.example.net", Some("00C"))).unwrap();
        reg.add_server(server("00E", "e.example.net", Some("00A"))).unwrap();

        let mut down = reg.downstream_sids(&Sid::new("00B"));
        down.sort();
        assert_eq!(
            down,
            vec![Sid::new("00B"), Sid::new("00C"), Sid::new("00D")]
        );
    }

    #[test]
    fn route_walks_to_the_direct_peer() {
        let mut reg = Registry::new(Sid::new("00A"));
        reg.add_server(server("00A", "us.example.net", None)).unwrap();
        reg.add_server(server("00B", "b.example.net", Some("00A"))).unwrap();
        reg.add_server(server("00C", "c.example.net", Some("00B"))).unwrap();
        assert_eq!(reg.route_to(&Sid::new("00C")), Some(Sid::new("00B")));
        assert_eq!(reg.route_to(&Sid::new("00B")), Some(Sid::new("00B")));
        assert_eq!(reg.route_to(&Sid::new("00A")), None);
    }

    #[test]
    fn masked_collision_detection() {
        let mut reg = Registry::new(Sid::new("00A"));
        reg.add_server(server("00B", "*.example.net", Some("00A")))
            .unwrap();
        assert!(reg.server_exists("leaf.example.net", None).is_some());
        assert!(reg.server_exists("leaf.example.net", Some("leaf.example.net")).is_none());
        assert!(reg.server_exists("leaf.other.org", None).is_none());
    }
}
