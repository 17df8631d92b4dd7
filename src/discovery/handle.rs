use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Reflector;
use super::ReflectorState;
use super::Registry;
use super::ServiceDelegate;
use super::ServiceRegisterInfo;
use crate::DiscoveryStore;
use crate::Error;
use crate::NamespacedStore;
use crate::Result;
use crate::SrvdisConfig;

/// Builder spawning the reflector as the single background writer
///
/// # Example
/// ```rust,ignore
/// let handle = DiscoveryBuilder::new(store, Arc::new(my_delegate))
///     .config(SrvdisConfig::new()?.validate()?)
///     .spawn();
///
/// handle.wait_until_streaming().await?;
/// handle.visit_by_type("gate", |id, info| println!("{id} -> {}", info.addr));
/// ```
pub struct DiscoveryBuilder<S> {
    store: S,
    delegate: Arc<dyn ServiceDelegate>,
    registry: Option<Arc<Registry>>,
    config: SrvdisConfig,
    shutdown: Option<CancellationToken>,
}

impl<S: DiscoveryStore> DiscoveryBuilder<S> {
    pub fn new(
        store: S,
        delegate: Arc<dyn ServiceDelegate>,
    ) -> Self {
        Self {
            store,
            delegate,
            registry: None,
            config: SrvdisConfig::default(),
            shutdown: None,
        }
    }

    pub fn config(
        mut self,
        config: SrvdisConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Registry to mirror into; defaults to [`Registry::global`]
    pub fn registry(
        mut self,
        registry: Arc<Registry>,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Parent cancellation token; the reflector stops when it fires
    pub fn shutdown_token(
        mut self,
        token: CancellationToken,
    ) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Spawns the reflector task on the current tokio runtime
    pub fn spawn(self) -> DiscoveryHandle {
        let registry = self.registry.unwrap_or_else(Registry::global);
        let shutdown = self.shutdown.map(|t| t.child_token()).unwrap_or_default();
        let namespace = self.config.discovery.namespace.clone();

        let (state, streamed, join) = if namespace.is_empty() {
            spawn_reflector(
                Reflector::new(self.store, registry.clone(), self.delegate, &self.config),
                shutdown.clone(),
            )
        } else {
            info!(namespace = %namespace, "discovery scoped to namespace");
            spawn_reflector(
                Reflector::new(
                    NamespacedStore::new(self.store, namespace),
                    registry.clone(),
                    self.delegate,
                    &self.config,
                ),
                shutdown.clone(),
            )
        };

        DiscoveryHandle {
            registry,
            state,
            streamed,
            shutdown,
            join,
        }
    }
}

fn spawn_reflector<S: DiscoveryStore>(
    mut reflector: Reflector<S>,
    shutdown: CancellationToken,
) -> (watch::Receiver<ReflectorState>, Arc<AtomicBool>, JoinHandle<Result<()>>) {
    let state = reflector.subscribe_state();
    let streamed = reflector.streamed_flag();
    let join = tokio::spawn(async move { reflector.run(shutdown).await });
    (state, streamed, join)
}

/// Running discovery: query surface plus lifecycle control
pub struct DiscoveryHandle {
    registry: Arc<Registry>,
    state: watch::Receiver<ReflectorState>,
    streamed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    join: JoinHandle<Result<()>>,
}

impl DiscoveryHandle {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn state(&self) -> ReflectorState {
        *self.state.borrow()
    }

    pub fn visit_by_type<F>(
        &self,
        service_type: &str,
        cb: F,
    ) where
        F: FnMut(&str, &ServiceRegisterInfo),
    {
        self.registry.visit_by_type(service_type, cb)
    }

    pub fn visit_by_type_prefix<F>(
        &self,
        prefix: &str,
        cb: F,
    ) where
        F: FnMut(&str, &str, &ServiceRegisterInfo),
    {
        self.registry.visit_by_type_prefix(prefix, cb)
    }

    /// Resolves once the snapshot has been applied and the stream opened
    ///
    /// Succeeds even if the reflector already left `Streaming` again by the
    /// time this is polled. Fails if it stopped without ever streaming; the
    /// cause is returned by [`join`](Self::join).
    pub async fn wait_until_streaming(&self) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s == ReflectorState::Streaming || s.is_stopped())
            .await
            .map(|s| *s);

        if self.streamed.load(Ordering::Acquire) {
            return Ok(());
        }
        match reached {
            Ok(ReflectorState::Streaming) => Ok(()),
            Ok(other) => Err(Error::Fatal(format!("reflector stopped in state {other:?}"))),
            Err(_) => Err(Error::Fatal("reflector task exited".to_string())),
        }
    }

    /// Cancels the reflector and waits for it to stop
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Waits for the reflector task to finish and returns its outcome
    pub async fn join(self) -> Result<()> {
        self.join.await?
    }
}
