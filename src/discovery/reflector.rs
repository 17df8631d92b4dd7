//! Watch/resync loop mirroring store registrations into the [`Registry`]
//!
//! ```text
//! Idle ─run()─> Bootstrapping ──snapshot @ R──> Streaming (watch from R+1)
//!                    │                              │
//!                    ├─ read failed / timed out ─> Faulted
//!                    │                              ├─ strict payload error ─> Faulted
//!                    │                              ├─ stream closed/lagged ─> Disconnected
//!                    └────────── cancelled ─────────┴─ cancelled ───────────> Terminated
//! ```
//!
//! Reading the snapshot first and then watching from `R + 1` is what keeps
//! the view gap free: every mutation committed after the read is delivered by
//! the stream, none twice. Events are applied one at a time in arrival order
//! and never concurrently, so per-key PUT/DELETE ordering is preserved.
//!
//! Running again after `Disconnected` performs a full resync: the fresh
//! snapshot is reconciled against the instances this reflector registered
//! and those that vanished while the stream was down are reported as
//! outdated. Entries written by other reflectors sharing the registry are
//! left alone.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::PathCodec;
use super::Registry;
use super::ServiceDelegate;
use super::ServiceRegisterInfo;
use crate::metrics::KNOWN_INSTANCES_METRIC;
use crate::metrics::SERVICE_DISCOVERED_METRIC;
use crate::metrics::SERVICE_OUTDATED_METRIC;
use crate::metrics::SKIPPED_RECORD_METRIC;
use crate::metrics::SNAPSHOT_LATENCY_METRIC;
use crate::metrics::STALE_DELETE_METRIC;
use crate::metrics::WATCH_EVENTS_METRIC;
use crate::metrics::WATCH_REVISION_METRIC;
use crate::DecodeError;
use crate::DiscoveryStore;
use crate::Error;
use crate::Result;
use crate::SrvdisConfig;
use crate::WatchError;
use crate::WatchEvent;
use crate::WatchEventType;

/// Lifecycle of a [`Reflector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectorState {
    /// Constructed, never run
    Idle,
    /// Reading and replaying the initial snapshot
    Bootstrapping,
    /// Applying the change stream
    Streaming,
    /// Stream lost; registry is valid up to the last applied revision
    Disconnected,
    /// Stopped by cancellation
    Terminated,
    /// Stopped by an unrecoverable error
    Faulted,
}

impl ReflectorState {
    /// Whether the reflector task has stopped applying events
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            ReflectorState::Disconnected | ReflectorState::Terminated | ReflectorState::Faulted
        )
    }
}

/// Single writer of a [`Registry`], fed by a [`DiscoveryStore`]
pub struct Reflector<S> {
    store: S,
    registry: Arc<Registry>,
    delegate: Arc<dyn ServiceDelegate>,
    codec: PathCodec,
    strict_payloads: bool,
    snapshot_timeout: Duration,
    state: watch::Sender<ReflectorState>,
    /// Revision of the snapshot the current stream was opened from
    snapshot_revision: u64,
    /// Highest revision applied so far
    last_revision: u64,
    /// `(service_type, service_id)` pairs this reflector registered
    applied: HashSet<(String, String)>,
    /// Set once the stream has been opened, never cleared
    streamed: Arc<AtomicBool>,
}

impl<S: DiscoveryStore> Reflector<S> {
    pub fn new(
        store: S,
        registry: Arc<Registry>,
        delegate: Arc<dyn ServiceDelegate>,
        config: &SrvdisConfig,
    ) -> Self {
        let (state, _) = watch::channel(ReflectorState::Idle);
        Self {
            store,
            registry,
            delegate,
            codec: PathCodec::new(config.discovery.prefix.clone()),
            strict_payloads: config.discovery.strict_payloads,
            snapshot_timeout: config.watch.snapshot_timeout(),
            state,
            snapshot_revision: 0,
            last_revision: 0,
            applied: HashSet::new(),
            streamed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn state(&self) -> ReflectorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReflectorState> {
        self.state.subscribe()
    }

    /// Flag raised the first time the reflector reaches
    /// [`ReflectorState::Streaming`]
    pub(crate) fn streamed_flag(&self) -> Arc<AtomicBool> {
        self.streamed.clone()
    }

    /// Highest store revision reflected in the registry
    pub fn last_revision(&self) -> u64 {
        self.last_revision
    }

    /// Bootstraps from a snapshot and applies the change stream until
    /// `shutdown` fires or the stream fails.
    ///
    /// Returns `Ok(())` only on cancellation. Errors for which
    /// [`Error::is_recoverable`] holds leave the registry consistent up to
    /// [`last_revision`](Self::last_revision); calling `run` again resyncs.
    pub async fn run(
        &mut self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let result = self.bootstrap_and_stream(&shutdown).await;

        let final_state = match &result {
            Ok(()) => {
                info!(last_revision = self.last_revision, "reflector terminated");
                ReflectorState::Terminated
            }
            Err(e) if e.is_recoverable() => {
                warn!(last_revision = self.last_revision, "reflector disconnected: {}", e);
                ReflectorState::Disconnected
            }
            Err(e) => {
                error!(last_revision = self.last_revision, "reflector faulted: {}", e);
                ReflectorState::Faulted
            }
        };
        self.set_state(final_state);

        result
    }

    async fn bootstrap_and_stream(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.set_state(ReflectorState::Bootstrapping);
        let prefix = self.codec.prefix().to_string();

        let started = Instant::now();
        let snapshot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("cancelled while reading snapshot");
                return Ok(());
            }
            result = timeout(self.snapshot_timeout, self.store.snapshot(&prefix)) => match result {
                Ok(snapshot) => snapshot?,
                Err(_) => return Err(WatchError::SnapshotTimeout(self.snapshot_timeout).into()),
            },
        };
        SNAPSHOT_LATENCY_METRIC.observe(started.elapsed().as_secs_f64() * 1000.0);

        info!(
            prefix = %prefix,
            revision = snapshot.revision,
            entries = snapshot.entries.len(),
            "snapshot read"
        );
        self.apply_snapshot(snapshot.entries, snapshot.revision)?;

        let mut stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("cancelled while opening watch");
                return Ok(());
            }
            result = self.store.watch(&prefix, self.snapshot_revision + 1) => result?,
        };
        self.set_state(ReflectorState::Streaming);
        info!(from_revision = self.snapshot_revision + 1, "watching {}", prefix);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("cancelled while streaming");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => self.apply_event(event)?,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(WatchError::StreamClosed {
                            last_revision: self.last_revision,
                        }
                        .into())
                    }
                },
            }
        }
    }

    /// Replays snapshot entries as PUTs and reconciles instances that are no
    /// longer present in the store
    fn apply_snapshot(
        &mut self,
        entries: Vec<crate::KeyValue>,
        revision: u64,
    ) -> Result<()> {
        let mut decoded = Vec::with_capacity(entries.len());
        for kv in entries {
            match self.codec.parse(&kv.key) {
                Ok((service_type, service_id)) => decoded.push((service_type, service_id, kv)),
                Err(e) => self.skip_record("invalid_key", &e),
            }
        }

        let alive: HashSet<(&str, &str)> = decoded
            .iter()
            .map(|(service_type, service_id, _)| (service_type.as_str(), service_id.as_str()))
            .collect();
        let vanished: Vec<(String, String)> = self
            .applied
            .iter()
            .filter(|(service_type, service_id)| !alive.contains(&(service_type.as_str(), service_id.as_str())))
            .cloned()
            .collect();
        for (service_type, service_id) in vanished {
            warn!("Service {}.{} vanished during resync", service_type, service_id);
            self.outdate(&service_type, &service_id);
        }

        for (service_type, service_id, kv) in decoded {
            self.discover(&service_type, &service_id, &kv.key, &kv.value)?;
        }

        self.snapshot_revision = revision;
        self.last_revision = revision;
        WATCH_REVISION_METRIC.set(revision as i64);
        Ok(())
    }

    fn apply_event(
        &mut self,
        event: WatchEvent,
    ) -> Result<()> {
        trace!(revision = event.revision, event_type = ?event.event_type, key = ?event.key, "watch event");

        if event.revision <= self.snapshot_revision {
            warn!(
                revision = event.revision,
                snapshot_revision = self.snapshot_revision,
                "dropping event already covered by snapshot"
            );
            SKIPPED_RECORD_METRIC.with_label_values(&["duplicate_revision"]).inc();
            return Ok(());
        }

        match event.event_type {
            WatchEventType::Put => {
                WATCH_EVENTS_METRIC.with_label_values(&["put"]).inc();
                match self.codec.parse(&event.key) {
                    Ok((service_type, service_id)) => {
                        self.discover(&service_type, &service_id, &event.key, &event.value)?
                    }
                    Err(e) => self.skip_record("invalid_key", &e),
                }
            }
            WatchEventType::Delete => {
                WATCH_EVENTS_METRIC.with_label_values(&["delete"]).inc();
                match self.codec.parse(&event.key) {
                    Ok((service_type, service_id)) => self.outdate(&service_type, &service_id),
                    Err(e) => self.skip_record("invalid_key", &e),
                }
            }
            WatchEventType::Other(code) => {
                debug!(code, revision = event.revision, "ignoring unsupported watch event");
            }
        }

        self.last_revision = self.last_revision.max(event.revision);
        WATCH_REVISION_METRIC.set(self.last_revision as i64);
        Ok(())
    }

    fn discover(
        &mut self,
        service_type: &str,
        service_id: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let info = match ServiceRegisterInfo::from_slice(value) {
            Ok(info) => info,
            Err(source) => {
                let e = DecodeError::MalformedPayload {
                    key: String::from_utf8_lossy(key).into_owned(),
                    source,
                };
                if self.strict_payloads {
                    return Err(Error::Decode(e));
                }
                self.skip_record("malformed_payload", &e);
                // The store no longer holds the previous payload either
                if self.registry.get(service_type, service_id).is_some() {
                    self.outdate(service_type, service_id);
                }
                return Ok(());
            }
        };

        let addr = info.addr.clone();
        info!("Service discovered: {}.{} = {}", service_type, service_id, info);
        self.registry.register_service(service_type, service_id, info);
        self.applied.insert((service_type.to_string(), service_id.to_string()));
        self.refresh_instance_gauge(service_type);

        SERVICE_DISCOVERED_METRIC.with_label_values(&[service_type]).inc();
        self.delegate.on_service_discovered(service_type, service_id, &addr);
        Ok(())
    }

    fn outdate(
        &mut self,
        service_type: &str,
        service_id: &str,
    ) {
        self.applied.remove(&(service_type.to_string(), service_id.to_string()));
        if self.registry.unregister_service(service_type, service_id) {
            warn!("Service outdated: {}.{}", service_type, service_id);
            self.refresh_instance_gauge(service_type);
        } else {
            // Delete for an id never seen, e.g. registered and removed before the snapshot
            warn!("service {}.{} outdated, not registered", service_type, service_id);
            STALE_DELETE_METRIC.with_label_values(&[service_type]).inc();
        }

        SERVICE_OUTDATED_METRIC.with_label_values(&[service_type]).inc();
        self.delegate.on_service_outdated(service_type, service_id);
    }

    fn skip_record(
        &self,
        reason: &str,
        e: &DecodeError,
    ) {
        error!("skipping store record ({}): {}", reason, e);
        SKIPPED_RECORD_METRIC.with_label_values(&[reason]).inc();
    }

    fn refresh_instance_gauge(
        &self,
        service_type: &str,
    ) {
        KNOWN_INSTANCES_METRIC
            .with_label_values(&[service_type])
            .set(self.registry.count_by_type(service_type) as i64);
    }

    fn set_state(
        &self,
        state: ReflectorState,
    ) {
        debug!(?state, "reflector state");
        if state == ReflectorState::Streaming {
            self.streamed.store(true, Ordering::Release);
        }
        self.state.send_replace(state);
    }
}
