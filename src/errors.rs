//! Service Discovery Error Hierarchy
//!
//! Errors are grouped by the layer that produced them: the backing store,
//! key/payload decoding, the watch protocol itself and configuration.
//! [`Error::is_recoverable`] separates conditions a caller may resync from
//! (stream loss, compaction) from the ones that must stop the process
//! (bootstrap failure, corrupt data in strict mode).

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures reported by the backing key-value store
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key or registration payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Watch/resync protocol failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store could not serve the request (connection refused, no quorum, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Requested revision has already been compacted away
    #[error("Revision {requested} compacted (oldest retained: {compact_revision})")]
    Compacted { requested: u64, compact_revision: u64 },

    /// Watcher fell behind the event feed; carries the number of dropped events
    #[error("Watch stream lagged, {0} events dropped")]
    Lagged(u64),

    /// Store side closed the change stream
    #[error("Watch stream closed by store")]
    Closed,

    /// Backend specific failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Key does not follow `<prefix><type>/<id>`
    #[error("Invalid registration key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// Registration payload is not a valid JSON `ServiceRegisterInfo`
    #[error("Malformed registration payload at {key:?}")]
    MalformedPayload {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Initial snapshot read exceeded its deadline
    #[error("Snapshot read timed out after {0:?}")]
    SnapshotTimeout(Duration),

    /// Change stream ended; state is valid up to `last_revision`
    #[error("Watch stream ended after revision {last_revision}")]
    StreamClosed { last_revision: u64 },

    /// Background reflector task panicked or was aborted
    #[error("Reflector task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

impl Error {
    /// Whether the registry is still trustworthy and a fresh snapshot can
    /// bring it up to date.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Watch(WatchError::StreamClosed { .. })
                | Error::Store(StoreError::Closed)
                | Error::Store(StoreError::Lagged(_))
                | Error::Store(StoreError::Compacted { .. })
        )
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        WatchError::TaskFailed(err).into()
    }
}
