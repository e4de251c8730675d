//! Channel registry
//!
//! Indexes every live channel on this node by id, backed by `DashMap` so
//! accept loops, read loops, and `push` callers can share it without a global lock.

use super::Channel;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent map of channel id to channel
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace the channel under its id, returning the one it replaced
    pub fn add(&self, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        let id = channel.id().to_string();
        let previous = self.channels.insert(id.clone(), channel);
        tracing::debug!(channel_id = %id, replaced = previous.is_some(), "Channel added");
        previous
    }

    /// Insert the channel only if its id is free
    ///
    /// Returns `false` and leaves the registry untouched when the id is taken.
    pub fn try_add(&self, channel: Arc<Channel>) -> bool {
        match self.channels.entry(channel.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::debug!(channel_id = %channel.id(), "Channel added");
                slot.insert(channel);
                true
            }
        }
    }

    /// Remove whatever channel is registered under `id`
    pub fn remove(&self, id: &str) -> Option<Arc<Channel>> {
        let removed = self.channels.remove(id).map(|(_, channel)| channel);
        if removed.is_some() {
            tracing::debug!(channel_id = %id, "Channel removed");
        }
        removed
    }

    /// Remove `channel` only if it is still the one registered under its id
    pub fn remove_channel(&self, channel: &Arc<Channel>) -> bool {
        let removed = self
            .channels
            .remove_if(channel.id(), |_, current| Arc::ptr_eq(current, channel))
            .is_some();
        if removed {
            tracing::debug!(channel_id = %channel.id(), "Channel removed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(id).map(|r| r.clone())
    }

    /// Snapshot of every registered channel, in no particular order
    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|r| r.value().clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .finish()
    }
}
