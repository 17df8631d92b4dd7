//! Store contract consumed by the reflector
//!
//! The discovery core treats the distributed key-value store as a black box
//! that offers two primitives:
//! - a consistent prefix read returning the matching entries together with
//!   the store revision the read was served at
//! - a prefix watch that delivers every mutation committed from a given
//!   revision onwards, in commit order
//!
//! Reading first and then watching from `revision + 1` stitches both into
//! one gap-free sequence of mutations.
//!
//! # Implementations
//!
//! - [`MemStore`]: in-process revisioned store (single process deployments, tests)
//! - [`NamespacedStore`]: decorator scoping any store under a deployment namespace

mod mem_store;
mod namespace;
pub use mem_store::*;
pub use namespace::*;


use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::StoreError;

/// Event type for watch notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    /// Key was inserted or updated
    Put,
    /// Key was deleted
    Delete,
    /// Event kind this client does not understand; carries the raw code
    Other(i32),
}

/// Key/value pair returned by a snapshot read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
    /// Revision of the last modification of this key
    pub mod_revision: u64,
}

/// Result of a consistent prefix read
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: Vec<KeyValue>,
    /// Store revision the read was served at
    pub revision: u64,
}

/// Single mutation delivered by a watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub key: Bytes,
    /// The new value (empty for DELETE events)
    pub value: Bytes,
    /// Revision at which the mutation was committed
    pub revision: u64,
}

impl WatchEvent {
    pub fn put(
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        revision: u64,
    ) -> Self {
        Self {
            event_type: WatchEventType::Put,
            key: key.into(),
            value: value.into(),
            revision,
        }
    }

    pub fn delete(
        key: impl Into<Bytes>,
        revision: u64,
    ) -> Self {
        Self {
            event_type: WatchEventType::Delete,
            key: key.into(),
            value: Bytes::new(),
            revision,
        }
    }
}

/// Ordered change stream; ends when the store closes the subscription
pub type WatchStream = BoxStream<'static, std::result::Result<WatchEvent, StoreError>>;

/// Snapshot-read and watch-from-revision primitives of the backing store.
///
/// # Ordering
///
/// `watch(prefix, rev)` must deliver every mutation with revision `>= rev`
/// exactly once and in commit order. Implementations that cannot serve `rev`
/// any more return [`StoreError::Compacted`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiscoveryStore: Send + Sync + 'static {
    /// Consistent read of every key starting with `prefix`
    async fn snapshot(
        &self,
        prefix: &str,
    ) -> std::result::Result<Snapshot, StoreError>;

    /// Subscribe to mutations under `prefix` starting at `from_revision`
    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> std::result::Result<WatchStream, StoreError>;
}

#[async_trait]
impl<S: DiscoveryStore + ?Sized> DiscoveryStore for Arc<S> {
    async fn snapshot(
        &self,
        prefix: &str,
    ) -> std::result::Result<Snapshot, StoreError> {
        (**self).snapshot(prefix).await
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> std::result::Result<WatchStream, StoreError> {
        (**self).watch(prefix, from_revision).await
    }
}
