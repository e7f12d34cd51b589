//! Bookkeeping of the channels an environment is subscribed to.
//!
//! An entry is added only after the transport accepted the subscription and
//! removed when the orchestrator unsubscribes, so each channel is
//! unsubscribed at most once.

use crate::clients::HandlerKind;
use crate::model::ChannelId;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: BTreeSet<(ChannelId, HandlerKind)>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, channel: &ChannelId, kind: HandlerKind) -> bool {
        self.active.contains(&(channel.clone(), kind))
    }

    /// Returns `false` if the entry was already present.
    pub fn insert(&mut self, channel: ChannelId, kind: HandlerKind) -> bool {
        self.active.insert((channel, kind))
    }

    /// Returns `false` if there was nothing to remove.
    pub fn remove(&mut self, channel: &ChannelId, kind: HandlerKind) -> bool {
        self.active.remove(&(channel.clone(), kind))
    }

    /// Empties the registry, returning every entry it held.
    pub fn drain(&mut self) -> Vec<(ChannelId, HandlerKind)> {
        std::mem::take(&mut self.active).into_iter().collect()
    }

    /// Subscribed channels, sorted and without duplicates.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.active.iter().map(|(channel, _)| channel.clone()).collect();
        channels.dedup();
        channels
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
