use std::collections::BTreeMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::DiscoveryStore;
use super::KeyValue;
use super::Snapshot;
use super::WatchEvent;
use super::WatchStream;
use crate::StoreError;
use crate::WatchConfig;

/// In-process revisioned key-value store
///
/// Every mutation bumps a store-wide revision, is appended to a bounded
/// history and published to live watchers. Watches replay the retained
/// history from the requested revision before switching to the live feed,
/// which gives the same gap-free contract a remote store offers.
pub struct MemStore {
    state: Mutex<MemStoreState>,
    history_limit: usize,
    event_buffer_size: usize,
}

struct MemStoreState {
    /// key -> (value, mod_revision)
    data: BTreeMap<Bytes, (Bytes, u64)>,
    revision: u64,
    history: VecDeque<WatchEvent>,
    /// Highest revision evicted from `history`
    compacted: u64,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(&WatchConfig::default())
    }
}

impl MemStore {
    pub fn new(config: &WatchConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer_size);
        Self {
            state: Mutex::new(MemStoreState {
                data: BTreeMap::new(),
                revision: 0,
                history: VecDeque::new(),
                compacted: 0,
                events,
            }),
            history_limit: config.history_limit,
            event_buffer_size: config.event_buffer_size,
        }
    }

    /// Stores `value` under `key`, returns the commit revision
    pub fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> u64 {
        let key = Bytes::copy_from_slice(key.as_ref());
        let value = Bytes::copy_from_slice(value.as_ref());

        let mut state = self.state.lock();
        state.revision += 1;
        let revision = state.revision;
        state.data.insert(key.clone(), (value.clone(), revision));
        trace!(revision, ?key, "mem store put");

        self.publish(&mut state, WatchEvent::put(key, value, revision));
        revision
    }

    /// Removes `key`; returns the commit revision or `None` when the key did
    /// not exist (no event is produced in that case)
    pub fn delete(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        let (key, _) = state.data.remove_entry(key.as_ref())?;

        state.revision += 1;
        let revision = state.revision;
        trace!(revision, ?key, "mem store delete");

        self.publish(&mut state, WatchEvent::delete(key, revision));
        Some(revision)
    }

    pub fn get(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Option<Bytes> {
        self.state.lock().data.get(key.as_ref()).map(|(value, _)| value.clone())
    }

    /// Current store revision
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Drops every live subscription as a lost connection would
    ///
    /// Open watch streams drain what they already received and then end.
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock();
        let (events, _) = broadcast::channel(self.event_buffer_size);
        let previous = std::mem::replace(&mut state.events, events);
        info!(
            watchers = previous.receiver_count(),
            revision = state.revision,
            "disconnecting mem store watchers"
        );
    }

    fn publish(
        &self,
        state: &mut MemStoreState,
        event: WatchEvent,
    ) {
        state.history.push_back(event.clone());
        while state.history.len() > self.history_limit {
            if let Some(evicted) = state.history.pop_front() {
                state.compacted = evicted.revision;
            }
        }

        // No receivers is fine: nobody is watching yet
        let _ = state.events.send(event);
    }
}

#[async_trait]
impl DiscoveryStore for MemStore {
    async fn snapshot(
        &self,
        prefix: &str,
    ) -> std::result::Result<Snapshot, StoreError> {
        let state = self.state.lock();
        let entries = state
            .data
            .range(Bytes::copy_from_slice(prefix.as_bytes())..)
            .take_while(|(key, _)| key.starts_with(prefix.as_bytes()))
            .map(|(key, (value, mod_revision))| KeyValue {
                key: key.clone(),
                value: value.clone(),
                mod_revision: *mod_revision,
            })
            .collect::<Vec<_>>();

        debug!(prefix, revision = state.revision, entries = entries.len(), "mem store snapshot");
        Ok(Snapshot {
            entries,
            revision: state.revision,
        })
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> std::result::Result<WatchStream, StoreError> {
        let state = self.state.lock();
        let from_revision = if from_revision == 0 {
            state.revision + 1
        } else {
            from_revision
        };

        if from_revision <= state.compacted {
            return Err(StoreError::Compacted {
                requested: from_revision,
                compact_revision: state.compacted + 1,
            });
        }

        let prefix = Bytes::copy_from_slice(prefix.as_bytes());
        let replay = state
            .history
            .iter()
            .filter(|event| event.revision >= from_revision && event.key.starts_with(&prefix))
            .cloned()
            .map(Ok)
            .collect::<Vec<_>>();

        // Subscribing under the same lock as the replay keeps the two halves contiguous
        let receiver = state.events.subscribe();
        drop(state);

        debug!(?prefix, from_revision, replayed = replay.len(), "mem store watch opened");

        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            let item = match item {
                Ok(event) if event.revision >= from_revision && event.key.starts_with(&prefix) => {
                    Some(Ok(event))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(StoreError::Lagged(missed))),
            };
            future::ready(item)
        });

        Ok(stream::iter(replay).chain(live).boxed())
    }
}
