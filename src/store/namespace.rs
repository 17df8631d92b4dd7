use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::warn;

use super::DiscoveryStore;
use super::KeyValue;
use super::Snapshot;
use super::WatchEvent;
use super::WatchStream;
use crate::StoreError;

/// Scopes a store under a deployment-wide namespace
///
/// Requests are issued for `<namespace><prefix>` and the namespace is
/// stripped from every key handed back, so the layers above only ever see
/// `/srvdis/<type>/<id>` keys.
pub struct NamespacedStore<S> {
    inner: S,
    namespace: String,
}

impl<S: DiscoveryStore> NamespacedStore<S> {
    pub fn new(
        inner: S,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn scoped(
        &self,
        prefix: &str,
    ) -> String {
        format!("{}{}", self.namespace, prefix)
    }
}

fn strip_namespace(
    namespace: &[u8],
    key: Bytes,
) -> Bytes {
    if key.starts_with(namespace) {
        key.slice(namespace.len()..)
    } else {
        // Only reachable with a misbehaving store; hand the key up untouched
        warn!(?key, "key outside of namespace returned by store");
        key
    }
}

#[async_trait]
impl<S: DiscoveryStore> DiscoveryStore for NamespacedStore<S> {
    async fn snapshot(
        &self,
        prefix: &str,
    ) -> std::result::Result<Snapshot, StoreError> {
        let snapshot = self.inner.snapshot(&self.scoped(prefix)).await?;
        let namespace = self.namespace.as_bytes();

        Ok(Snapshot {
            entries: snapshot
                .entries
                .into_iter()
                .map(|kv| KeyValue {
                    key: strip_namespace(namespace, kv.key),
                    ..kv
                })
                .collect(),
            revision: snapshot.revision,
        })
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> std::result::Result<WatchStream, StoreError> {
        let stream = self.inner.watch(&self.scoped(prefix), from_revision).await?;
        let namespace = Bytes::copy_from_slice(self.namespace.as_bytes());

        Ok(stream
            .map(move |item| {
                item.map(|event| WatchEvent {
                    key: strip_namespace(&namespace, event.key),
                    ..event
                })
            })
            .boxed())
    }
}
