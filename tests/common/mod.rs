use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use srvdis::Registry;
use srvdis::ServiceDelegate;
use srvdis::ServiceRegisterInfo;

pub const WAIT_FOR_REGISTRY_IN_SEC: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Discovered {
        service_type: String,
        service_id: String,
        addr: String,
    },
    Outdated {
        service_type: String,
        service_id: String,
    },
}

/// Delegate keeping every callback in arrival order
#[derive(Default)]
pub struct RecordingDelegate {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Folds the callbacks into the set of instances a delegate would
    /// consider alive
    pub fn alive(&self) -> BTreeMap<(String, String), String> {
        let mut alive = BTreeMap::new();
        for n in self.notifications.lock().iter() {
            match n {
                Notification::Discovered {
                    service_type,
                    service_id,
                    addr,
                } => {
                    alive.insert((service_type.clone(), service_id.clone()), addr.clone());
                }
                Notification::Outdated {
                    service_type,
                    service_id,
                } => {
                    alive.remove(&(service_type.clone(), service_id.clone()));
                }
            }
        }
        alive
    }
}

impl ServiceDelegate for RecordingDelegate {
    fn on_service_discovered(
        &self,
        service_type: &str,
        service_id: &str,
        addr: &str,
    ) {
        self.notifications.lock().push(Notification::Discovered {
            service_type: service_type.to_string(),
            service_id: service_id.to_string(),
            addr: addr.to_string(),
        });
    }

    fn on_service_outdated(
        &self,
        service_type: &str,
        service_id: &str,
    ) {
        self.notifications.lock().push(Notification::Outdated {
            service_type: service_type.to_string(),
            service_id: service_id.to_string(),
        });
    }
}

pub fn payload(addr: &str) -> Vec<u8> {
    ServiceRegisterInfo::new(addr).to_vec().unwrap()
}

/// Every registered instance as `(type, id) -> addr`
pub fn registry_contents(registry: &Registry) -> BTreeMap<(String, String), String> {
    let mut contents = BTreeMap::new();
    registry.visit_by_type_prefix("", |service_type, service_id, info| {
        contents.insert((service_type.to_string(), service_id.to_string()), info.addr.clone());
    });
    contents
}

pub async fn wait_for_instance(
    registry: &Registry,
    service_type: &str,
    service_id: &str,
) {
    tokio::time::timeout(Duration::from_secs(WAIT_FOR_REGISTRY_IN_SEC), async {
        while registry.get(service_type, service_id).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{service_type}.{service_id} not discovered in time"));
}
