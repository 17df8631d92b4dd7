use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Payload stored for every service registration
///
/// The wire form is a JSON object with at least an `Addr` field. Any other
/// field the registration side adds is kept in `metadata` so newer
/// registrars stay readable.
///
/// ```rust
/// use srvdis::ServiceRegisterInfo;
///
/// let info = ServiceRegisterInfo::from_slice(br#"{"Addr":"10.0.0.1:8000","Zone":"eu"}"#).unwrap();
/// assert_eq!(info.addr, "10.0.0.1:8000");
/// assert_eq!(info.metadata["Zone"], "eu");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegisterInfo {
    /// host:port the service instance is reachable at
    #[serde(rename = "Addr")]
    pub addr: String,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ServiceRegisterInfo {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl fmt::Display for ServiceRegisterInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.metadata.is_empty() {
            write!(f, "{{Addr: {}}}", self.addr)
        } else {
            write!(f, "{{Addr: {}, {}}}", self.addr, Value::Object(self.metadata.clone()))
        }
    }
}
