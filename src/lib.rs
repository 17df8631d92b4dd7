//! Service discovery reflector
//!
//! Mirrors service registrations kept in a strongly consistent key-value
//! store into an in-process [`Registry`] and reports joins and leaves to a
//! [`ServiceDelegate`].
//!
//! ```rust,ignore
//! let store = Arc::new(MemStore::default());
//! let handle = DiscoveryBuilder::new(store.clone(), Arc::new(LoggingDelegate))
//!     .registry(Arc::new(Registry::new()))
//!     .spawn();
//! handle.wait_until_streaming().await?;
//!
//! let key = PathCodec::default().format("gate", "1");
//! store.put(key, ServiceRegisterInfo::new("10.0.0.1:8000").to_vec()?);
//! ```

mod config;
mod constants;
mod discovery;
mod errors;
pub mod metrics;
mod store;

pub use config::*;
pub use constants::DEFAULT_DISCOVERY_PREFIX;
pub use discovery::*;
pub use errors::*;
pub use store::*;
