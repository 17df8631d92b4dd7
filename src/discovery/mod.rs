//! Service discovery core
//!
//! - [`PathCodec`] - registration key <-> `(service_type, service_id)`
//! - [`Registry`] - in-memory view of alive instances
//! - [`Reflector`] - snapshot + watch loop feeding the registry
//! - [`ServiceDelegate`] - join/leave callbacks
//! - [`DiscoveryBuilder`] / [`DiscoveryHandle`] - background task wiring

mod delegate;
mod handle;
mod path_codec;
mod reflector;
mod register_info;
mod registry;

pub use delegate::*;
pub use handle::*;
pub use path_codec::*;
pub use reflector::*;
pub use register_info::*;
pub use registry::*;
