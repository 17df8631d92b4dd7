#[cfg(test)]
use mockall::automock;
use tracing::info;

/// Join/leave notifications emitted by the reflector
///
/// Both methods are called synchronously from the reflector task, in store
/// order. Implementations must return promptly: while a callback runs no
/// further store events are applied.
#[cfg_attr(test, automock)]
pub trait ServiceDelegate: Send + Sync + 'static {
    /// A service instance appeared or changed its registration
    fn on_service_discovered(
        &self,
        service_type: &str,
        service_id: &str,
        addr: &str,
    );

    /// A service instance went away
    fn on_service_outdated(
        &self,
        service_type: &str,
        service_id: &str,
    );
}

/// Delegate for consumers that only query the registry
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDelegate;

impl ServiceDelegate for LoggingDelegate {
    fn on_service_discovered(
        &self,
        service_type: &str,
        service_id: &str,
        addr: &str,
    ) {
        info!(service_type, service_id, addr, "service joined");
    }

    fn on_service_outdated(
        &self,
        service_type: &str,
        service_id: &str,
    ) {
        info!(service_type, service_id, "service left");
    }
}
