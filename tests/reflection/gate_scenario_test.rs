use std::io::Write;
use std::sync::Arc;

use srvdis::DiscoveryBuilder;
use srvdis::MemStore;
use srvdis::PathCodec;
use srvdis::Reflector;
use srvdis::ReflectorState;
use srvdis::Registry;
use srvdis::SrvdisConfig;
use tokio_util::sync::CancellationToken;

use crate::common::payload;
use crate::common::registry_contents;
use crate::common::wait_for_instance;
use crate::common::Notification;
use crate::common::RecordingDelegate;

fn discovered(
    service_type: &str,
    service_id: &str,
    addr: &str,
) -> Notification {
    Notification::Discovered {
        service_type: service_type.to_string(),
        service_id: service_id.to_string(),
        addr: addr.to_string(),
    }
}

fn outdated(
    service_type: &str,
    service_id: &str,
) -> Notification {
    Notification::Outdated {
        service_type: service_type.to_string(),
        service_id: service_id.to_string(),
    }
}

/// gate/1 exists before bootstrap, gate/2 joins and gate/1 leaves while
/// streaming; only gate/2 must remain.
#[tokio::test]
async fn test_gate_join_and_leave_after_bootstrap() {
    let codec = PathCodec::default();
    let store = Arc::new(MemStore::default());
    store.put(codec.format("gate", "1"), payload("10.0.0.1:8000"));

    let registry = Arc::new(Registry::new());
    let delegate = RecordingDelegate::new();
    let handle = DiscoveryBuilder::new(store.clone(), delegate.clone())
        .registry(registry.clone())
        .spawn();
    handle.wait_until_streaming().await.unwrap();

    store.put(codec.format("gate", "2"), payload("10.0.0.2:8000"));
    store.delete(codec.format("gate", "1"));
    // Marker written last; once it shows up every earlier event was applied
    store.put(codec.format("marker", "done"), payload("127.0.0.1:1"));
    wait_for_instance(&registry, "marker", "done").await;

    let mut gates = Vec::new();
    handle.visit_by_type("gate", |service_id, info| {
        gates.push((service_id.to_string(), info.addr.clone()));
    });
    assert_eq!(gates, vec![("2".to_string(), "10.0.0.2:8000".to_string())]);

    assert_eq!(
        delegate.notifications(),
        vec![
            discovered("gate", "1", "10.0.0.1:8000"),
            discovered("gate", "2", "10.0.0.2:8000"),
            outdated("gate", "1"),
            discovered("marker", "done", "127.0.0.1:1"),
        ]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rooms_by_type_prefix() {
    let codec = PathCodec::default();
    let store = Arc::new(MemStore::default());
    store.put(codec.format("room.pvp", "1"), payload("10.0.2.1:9000"));
    store.put(codec.format("room.pve", "1"), payload("10.0.3.1:9000"));
    store.put(codec.format("lobby", "1"), payload("10.0.4.1:9000"));

    let registry = Arc::new(Registry::new());
    let handle = DiscoveryBuilder::new(store.clone(), RecordingDelegate::new())
        .registry(registry.clone())
        .spawn();
    handle.wait_until_streaming().await.unwrap();

    let mut rooms = Vec::new();
    handle.visit_by_type_prefix("room.", |service_type, service_id, info| {
        rooms.push((service_type.to_string(), service_id.to_string(), info.addr.clone()));
    });
    rooms.sort();
    assert_eq!(
        rooms,
        vec![
            ("room.pve".to_string(), "1".to_string(), "10.0.3.1:9000".to_string()),
            ("room.pvp".to_string(), "1".to_string(), "10.0.2.1:9000".to_string()),
        ]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_config_file_selects_prefix() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[discovery]
prefix = "/game/"

[watch]
snapshot_timeout_ms = 2000
"#
    )
    .unwrap();
    let config = SrvdisConfig::default()
        .with_override_config(file.path().to_str().unwrap())
        .unwrap()
        .validate()
        .unwrap();

    let store = Arc::new(MemStore::default());
    store.put("/game/gate/1", payload("10.0.0.1:8000"));
    store.put("/srvdis/gate/2", payload("10.0.0.2:8000"));

    let registry = Arc::new(Registry::new());
    let handle = DiscoveryBuilder::new(store.clone(), RecordingDelegate::new())
        .registry(registry.clone())
        .config(config)
        .spawn();
    handle.wait_until_streaming().await.unwrap();

    let contents = registry_contents(&registry);
    assert_eq!(contents.len(), 1);
    assert_eq!(
        contents.get(&("gate".to_string(), "1".to_string())),
        Some(&"10.0.0.1:8000".to_string())
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resync_after_disconnect() {
    let codec = PathCodec::default();
    let store = Arc::new(MemStore::default());
    store.put(codec.format("gate", "1"), payload("10.0.0.1:8000"));

    let registry = Arc::new(Registry::new());
    let delegate = RecordingDelegate::new();
    let mut reflector = Reflector::new(store.clone(), registry.clone(), delegate.clone(), &SrvdisConfig::default());
    let mut state = reflector.subscribe_state();

    let first = tokio::spawn(async move {
        let result = reflector.run(CancellationToken::new()).await;
        (result, reflector)
    });
    state.wait_for(|s| *s == ReflectorState::Streaming).await.unwrap();

    store.disconnect_watchers();
    let (result, mut reflector) = first.await.unwrap();
    assert!(result.unwrap_err().is_recoverable());
    assert_eq!(reflector.state(), ReflectorState::Disconnected);

    // gate/1 leaves while nobody is watching
    store.delete(codec.format("gate", "1"));
    store.put(codec.format("gate", "2"), payload("10.0.0.2:8000"));

    let token = CancellationToken::new();
    let second = tokio::spawn({
        let token = token.clone();
        async move { reflector.run(token).await }
    });
    state.wait_for(|s| *s == ReflectorState::Streaming).await.unwrap();
    token.cancel();
    second.await.unwrap().unwrap();

    assert_eq!(
        registry_contents(&registry).into_keys().collect::<Vec<_>>(),
        vec![("gate".to_string(), "2".to_string())]
    );
    assert!(delegate.notifications().contains(&outdated("gate", "1")));
    assert_eq!(delegate.alive(), registry_contents(&registry));
}
