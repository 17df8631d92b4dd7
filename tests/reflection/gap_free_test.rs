use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use srvdis::DiscoveryBuilder;
use srvdis::DiscoveryStore;
use srvdis::MemStore;
use srvdis::PathCodec;
use srvdis::Registry;
use srvdis::Snapshot;
use srvdis::StoreError;
use srvdis::WatchStream;

use crate::common::payload;
use crate::common::registry_contents;
use crate::common::wait_for_instance;
use crate::common::RecordingDelegate;

const SERVICE_TYPES: [&str; 3] = ["gate", "game", "room.pvp"];

#[derive(Debug, Clone)]
enum Op {
    Put { ty: usize, id: u8, port: u16 },
    Delete { ty: usize, id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..SERVICE_TYPES.len(), 0u8..4, 1u16..u16::MAX).prop_map(|(ty, id, port)| Op::Put { ty, id, port }),
        2 => (0..SERVICE_TYPES.len(), 0u8..4).prop_map(|(ty, id)| Op::Delete { ty, id }),
    ]
}

fn apply(
    store: &MemStore,
    model: &mut BTreeMap<(String, String), String>,
    codec: &PathCodec,
    op: &Op,
) {
    match op {
        Op::Put { ty, id, port } => {
            let addr = format!("10.0.0.{id}:{port}");
            store.put(codec.format(SERVICE_TYPES[*ty], &id.to_string()), payload(&addr));
            model.insert((SERVICE_TYPES[*ty].to_string(), id.to_string()), addr);
        }
        Op::Delete { ty, id } => {
            store.delete(codec.format(SERVICE_TYPES[*ty], &id.to_string()));
            model.remove(&(SERVICE_TYPES[*ty].to_string(), id.to_string()));
        }
    }
}

/// Runs `ops[..split]` before bootstrap and the rest while streaming, then
/// returns `(expected, registry, delegate view)`.
async fn reflect(
    ops: Vec<Op>,
    split: usize,
) -> (
    BTreeMap<(String, String), String>,
    BTreeMap<(String, String), String>,
    BTreeMap<(String, String), String>,
) {
    let codec = PathCodec::default();
    let store = Arc::new(MemStore::default());
    let mut model = BTreeMap::new();
    let split = split.min(ops.len());

    for op in &ops[..split] {
        apply(&store, &mut model, &codec, op);
    }

    let registry = Arc::new(Registry::new());
    let delegate = RecordingDelegate::new();
    let handle = DiscoveryBuilder::new(store.clone(), delegate.clone())
        .registry(registry.clone())
        .spawn();
    handle.wait_until_streaming().await.unwrap();

    for op in &ops[split..] {
        apply(&store, &mut model, &codec, op);
    }
    store.put(codec.format("marker", "done"), payload("127.0.0.1:1"));
    wait_for_instance(&registry, "marker", "done").await;
    handle.shutdown().await.unwrap();

    let marker = ("marker".to_string(), "done".to_string());
    let mut contents = registry_contents(&registry);
    contents.remove(&marker);
    let mut alive = delegate.alive();
    alive.remove(&marker);

    (model, contents, alive)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Wherever the bootstrap lands in the mutation history, the mirrored
    /// view ends up equal to the store contents.
    #[test]
    fn test_registry_matches_store_for_any_bootstrap_point(
        ops in proptest::collection::vec(op_strategy(), 0..40),
        split in 0usize..40,
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (expected, registry, delegate_view) = rt.block_on(reflect(ops, split));

        prop_assert_eq!(&registry, &expected);
        prop_assert_eq!(&delegate_view, &expected);
    }
}

/// Commits `ops` after the snapshot has been served but before the watch is
/// opened, the window the revision stitching has to cover.
struct RacingStore {
    inner: Arc<MemStore>,
    ops: Vec<Op>,
    model: parking_lot::Mutex<BTreeMap<(String, String), String>>,
    raced: AtomicBool,
}

#[async_trait]
impl DiscoveryStore for RacingStore {
    async fn snapshot(
        &self,
        prefix: &str,
    ) -> std::result::Result<Snapshot, StoreError> {
        self.inner.snapshot(prefix).await
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: u64,
    ) -> std::result::Result<WatchStream, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let codec = PathCodec::default();
            let mut model = self.model.lock();
            for op in &self.ops {
                apply(&self.inner, &mut model, &codec, op);
            }
        }
        self.inner.watch(prefix, from_revision).await
    }
}

#[tokio::test]
async fn test_mutations_between_snapshot_and_watch_are_not_lost() {
    let codec = PathCodec::default();
    let inner = Arc::new(MemStore::default());
    let mut model = BTreeMap::new();
    apply(&inner, &mut model, &codec, &Op::Put { ty: 0, id: 1, port: 8000 });

    let store = Arc::new(RacingStore {
        inner: inner.clone(),
        ops: vec![
            Op::Put { ty: 0, id: 2, port: 8000 },
            Op::Delete { ty: 0, id: 1 },
        ],
        model: parking_lot::Mutex::new(model),
        raced: AtomicBool::new(false),
    });

    let registry = Arc::new(Registry::new());
    let delegate = RecordingDelegate::new();
    let handle = DiscoveryBuilder::new(store.clone(), delegate.clone())
        .registry(registry.clone())
        .spawn();
    handle.wait_until_streaming().await.unwrap();

    inner.put(codec.format("marker", "done"), payload("127.0.0.1:1"));
    wait_for_instance(&registry, "marker", "done").await;
    handle.shutdown().await.unwrap();

    let marker = ("marker".to_string(), "done".to_string());
    let mut contents = registry_contents(&registry);
    contents.remove(&marker);
    let mut alive = delegate.alive();
    alive.remove(&marker);

    let expected = store.model.lock().clone();
    assert_eq!(
        expected,
        BTreeMap::from([(("gate".to_string(), "2".to_string()), "10.0.0.2:8000".to_string())])
    );
    assert_eq!(contents, expected);
    assert_eq!(alive, expected);
}
