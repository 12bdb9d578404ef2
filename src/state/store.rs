//! The channel store.
//!
//! Owns every channel in an arena; the name index maps the casemapped
//! name to a stable handle. Nothing outside this module allocates or
//! frees channels.

use std::collections::HashMap;

use slab::Slab;
use tracing::debug;

use mesh_proto::limits::CHANNELLEN;
use mesh_proto::{check_channel_name, irc_eq, irc_to_lower, ChanPrefix};

use super::channel::Channel;

/// Stable handle to a channel.
pub type ChanId = usize;

/// Arena-backed store of all channels.
#[derive(Debug, Default)]
pub struct ChannelStore {
    arena: Slab<Channel>,
    by_name: HashMap<String, ChanId>,
}

impl ChannelStore {
    /// Empty store.
    pub fn new() -> ChannelStore {
        ChannelStore::default()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether no channels exist.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Borrow by handle. Handles are only handed out by this store, so a
    /// miss is a state-coherence bug upstream.
    pub fn get(&self, id: ChanId) -> &Channel {
        &self.arena[id]
    }

    /// Borrow mutably by handle.
    pub fn get_mut(&mut self, id: ChanId) -> &mut Channel {
        &mut self.arena[id]
    }

    /// Borrow by handle without asserting liveness; the invariant
    /// checker uses this so a stale handle is reported, not a panic.
    pub fn maybe(&self, id: ChanId) -> Option<&Channel> {
        self.arena.get(id)
    }

    /// Look a channel up by name, casemapped.
    pub fn find(&self, name: &str) -> Option<ChanId> {
        self.by_name.get(&irc_to_lower(name)).copied()
    }

    /// Iterate all channels.
    pub fn iter(&self) -> impl Iterator<Item = (ChanId, &Channel)> {
        self.arena.iter()
    }

    /// Allocate a channel that is known not to exist yet.
    pub fn allocate(&mut self, name: &str) -> ChanId {
        let id = self.arena.insert(Channel::new(name));
        self.by_name.insert(irc_to_lower(name), id);
        id
    }

    /// Find or allocate; `true` in the result means freshly created.
    /// Returns `None` for names that fail validation, which the caller
    /// surfaces as ERR_UNAVAILRESOURCE.
    pub fn get_or_create(&mut self, name: &str) -> Option<(ChanId, bool)> {
        if !check_channel_name(name) || name.len() > CHANNELLEN {
            return None;
        }
        if let Some(id) = self.find(name) {
            return Some((id, false));
        }
        Some((self.allocate(name), true))
    }

    /// Remove a channel and its index entry.
    pub fn destroy(&mut self, id: ChanId) -> Channel {
        let channel = self.arena.remove(id);
        self.by_name.remove(&irc_to_lower(&channel.name));
        debug!(channel = %channel.name, "channel destroyed");
        channel
    }

    /// All `!` channels whose shortname matches, casemapped.
    pub fn find_by_shortname(&self, shortname: &str) -> Vec<ChanId> {
        self.arena
            .iter()
            .filter(|(_, c)| {
                c.shortname()
                    .map(|sn| irc_eq(sn, shortname))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Destroy every empty, unlockable channel whose delay window has
    /// closed. Returns the names destroyed, for logging.
    pub fn sweep(&mut self, now: i64, delay: i64) -> Vec<String> {
        let expired: Vec<ChanId> = self
            .arena
            .iter()
            .filter(|(_, c)| {
                c.members.is_empty()
                    && c.prefix() != ChanPrefix::Modeless
                    && !c.info.service
                    && !c.has_history(now, delay)
            })
            .map(|(id, _)| id)
            .collect();
        expired
            .into_iter()
            .map(|id| self.destroy(id).name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_casemapped() {
        let mut store = ChannelStore::new();
        let id = store.allocate("#Test[1]");
        assert_eq!(store.find("#test{1}"), Some(id));
    }

    #[test]
    fn get_or_create_validates() {
        let mut store = ChannelStore::new();
        assert!(store.get_or_create("#ok").is_some());
        assert!(store.get_or_create("bad name").is_none());
        assert!(store.get_or_create("#with space").is_none());
        let long = format!("#{}", "x".repeat(CHANNELLEN));
        assert!(store.get_or_create(&long).is_none());
    }

    #[test]
    fn destroy_frees_the_name() {
        let mut store = ChannelStore::new();
        let id = store.allocate("#gone");
        store.destroy(id);
        assert_eq!(store.find("#gone"), None);
        let (_, isnew) = store.get_or_create("#gone").unwrap();
        assert!(isnew);
    }

    #[test]
    fn shortname_index() {
        let mut store = ChannelStore::new();
        let a = store.allocate("!AAAAAwidgets");
        let b = store.allocate("!BBBBBwidgets");
        store.allocate("!CCCCCother");
        let mut found = store.find_by_shortname("widgets");
        found.sort_unstable();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn sweep_destroys_expired_empties() {
        let mut store = ChannelStore::new();
        let id = store.allocate("#idle");
        store.get_mut(id).chlock = Some(100);
        assert!(store.sweep(130, 60).is_empty());
        assert_eq!(store.sweep(200, 60), vec!["#idle".to_owned()]);

        // modeless channels are never swept
        store.allocate("+linger");
        assert!(store.sweep(10_000, 60).is_empty());
    }
}
