//! Concurrent registry of virtual channels keyed by [`ChannelId`].
//!
//! All mutation goes through per-key atomic operations, so concurrent
//! datagrams of the same flow can never create two channels. Entries are only
//! removed by the sweep (once closed) or replaced by a client registration
//! over a dead entry; closing a channel never removes it eagerly.

use corelib::Channel;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};

use crate::channel::{ChannelId, UdpChannel};

/// Mapping `ChannelId -> UdpChannel`, owned by one peer group.
pub struct ChannelRegistry<M> {
    channels: DashMap<ChannelId, UdpChannel<M>>,
}

impl<M: Send + 'static> ChannelRegistry<M> {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Return the live channel for `id`, or install the one built by `create`.
    ///
    /// A present but closed entry counts as absent and is replaced.
    ///
    /// # Returns
    /// The channel and whether it was created by this call. `true` is returned
    /// exactly once per live channel, which is what drives publish-once.
    pub fn get_or_create<F>(&self, id: ChannelId, create: F) -> (UdpChannel<M>, bool)
    where
        F: FnOnce() -> UdpChannel<M>,
    {
        let (channel, created) = match self.channels.entry(id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_open() {
                    (entry.get().clone(), false)
                } else {
                    let channel = create();
                    entry.insert(channel.clone());
                    (channel, true)
                }
            }
            Entry::Vacant(entry) => {
                let channel = create();
                entry.insert(channel.clone());
                (channel, true)
            }
        };

        if created {
            counter!("datagram_channels_created_total").increment(1);
            self.record_size();
        }
        (channel, created)
    }

    /// Install a channel created by `client()`.
    ///
    /// # Errors
    /// Returns the existing channel if a live one already owns this id. The
    /// transport hands out a fresh ephemeral port per client, so this only
    /// happens if that assumption is broken.
    pub fn register_client(&self, channel: UdpChannel<M>) -> Result<(), UdpChannel<M>> {
        let result = match self.channels.entry(channel.id()) {
            Entry::Occupied(entry) if entry.get().is_open() => Err(entry.get().clone()),
            Entry::Occupied(mut entry) => {
                entry.insert(channel);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(channel);
                Ok(())
            }
        };

        if result.is_ok() {
            counter!("datagram_channels_created_total").increment(1);
            self.record_size();
        }
        result
    }

    pub fn get(&self, id: &ChannelId) -> Option<UdpChannel<M>> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    /// Evict every entry whose channel is closed. Open channels are untouched.
    ///
    /// # Returns
    /// Number of evicted entries.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        self.channels.retain(|_, channel| {
            let keep = channel.is_open();
            if !keep {
                evicted += 1;
            }
            keep
        });

        counter!("datagram_channels_evicted_total").increment(evicted as u64);
        self.record_size();
        evicted
    }

    /// Remove and return every channel, open or not.
    pub fn drain(&self) -> Vec<UdpChannel<M>> {
        let channels: Vec<_> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.channels.clear();
        self.record_size();
        channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    // Must not be called while holding an entry guard: `len` locks every shard.
    fn record_size(&self) {
        gauge!("datagram_registry_channels").set(self.channels.len() as f64);
    }
}

impl<M: Send + 'static> Default for ChannelRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::{Arc, Weak};

    use corelib::BincodeCodec;
    use proptest::prelude::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn id(remote: u16) -> ChannelId {
        ChannelId::new(addr(remote), addr(9000))
    }

    fn server(id: ChannelId) -> UdpChannel<u32> {
        UdpChannel::server(id, Weak::new(), Arc::new(BincodeCodec::<u32>::new()), 1024)
    }

    #[test]
    fn test_get_or_create_reuses_live_channel() {
        let registry = ChannelRegistry::new();

        let (first, created) = registry.get_or_create(id(1), || server(id(1)));
        assert!(created);
        let (second, created) = registry.get_or_create(id(1), || panic!("must reuse"));
        assert!(!created);
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_entry_is_replaced_on_next_contact() {
        let registry = ChannelRegistry::new();
        let (first, _) = registry.get_or_create(id(2), || server(id(2)));
        first.close().await.unwrap();

        let (second, created) = registry.get_or_create(id(2), || server(id(2)));
        assert!(created);
        assert!(second.is_open());
        assert!(!first.is_open());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_closed_channels() {
        let registry = ChannelRegistry::new();
        let (a, _) = registry.get_or_create(id(3), || server(id(3)));
        registry.get_or_create(id(4), || server(id(4)));
        registry.get_or_create(id(5), || server(id(5)));

        a.close().await.unwrap();
        // Closing does not remove the entry by itself.
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&id(3)).is_none());
        assert!(registry.get(&id(4)).unwrap().is_open());
        assert_eq!(registry.sweep(), 0);
    }

    #[tokio::test]
    async fn test_register_client_rejects_live_duplicate() {
        let registry = ChannelRegistry::new();
        registry.register_client(server(id(6))).unwrap();
        let duplicate = registry.register_client(server(id(6)));
        assert!(duplicate.is_err());

        registry.get(&id(6)).unwrap().close().await.unwrap();
        assert!(registry.register_client(server(id(6))).is_ok());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ChannelRegistry::new();
        registry.get_or_create(id(7), || server(id(7)));
        registry.get_or_create(id(8), || server(id(8)));

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn prop_one_creation_per_distinct_remote(
            remotes in prop::collection::vec(1u16..20, 1..200)
        ) {
            let registry = ChannelRegistry::new();
            let mut created = 0;
            for remote in &remotes {
                let (_, fresh) = registry.get_or_create(id(*remote), || server(id(*remote)));
                if fresh {
                    created += 1;
                }
            }
            let distinct: HashSet<_> = remotes.iter().collect();
            prop_assert_eq!(created, distinct.len());
            prop_assert_eq!(registry.len(), distinct.len());
        }
    }
}
