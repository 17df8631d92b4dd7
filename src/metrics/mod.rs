use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref WATCH_EVENTS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_events", "Store events applied by the reflector"),
        &["event_type"]
    )
    .expect("metric can not be created");

    pub static ref SERVICE_DISCOVERED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("service_discovered", "Join notifications delivered to the delegate"),
        &["service_type"]
    )
    .expect("metric can not be created");

    pub static ref SERVICE_OUTDATED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("service_outdated", "Leave notifications delivered to the delegate"),
        &["service_type"]
    )
    .expect("metric can not be created");

    pub static ref STALE_DELETE_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("stale_delete", "Deletes for ids that were not registered"),
        &["service_type"]
    )
    .expect("metric can not be created");

    pub static ref SKIPPED_RECORD_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("skipped_record", "Store records dropped by the reflector"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref KNOWN_INSTANCES_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("known_instances", "Registered instances per service type"),
        &["service_type"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_REVISION_METRIC: IntGauge =
        IntGauge::new("watch_revision", "Last store revision applied to the registry")
            .expect("metric can not be created");

    pub static ref SNAPSHOT_LATENCY_METRIC: Histogram = Histogram::with_opts(
        HistogramOpts::new("snapshot_latency_ms", "Bootstrap snapshot read latency in ms")
            .buckets(exponential_buckets(1.0, 2.0, 14).expect("valid buckets"))
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registers every discovery collector on `registry`
///
/// Fails with `AlreadyReg` when called twice for the same registry.
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(WATCH_EVENTS_METRIC.clone()))?;
    registry.register(Box::new(SERVICE_DISCOVERED_METRIC.clone()))?;
    registry.register(Box::new(SERVICE_OUTDATED_METRIC.clone()))?;
    registry.register(Box::new(STALE_DELETE_METRIC.clone()))?;
    registry.register(Box::new(SKIPPED_RECORD_METRIC.clone()))?;
    registry.register(Box::new(KNOWN_INSTANCES_METRIC.clone()))?;
    registry.register(Box::new(WATCH_REVISION_METRIC.clone()))?;
    registry.register(Box::new(SNAPSHOT_LATENCY_METRIC.clone()))?;
    Ok(())
}

/// Export the crate registry in Prometheus text format
///
/// Call [`register_custom_metrics`] with [`struct@REGISTRY`] once at startup.
pub fn get_metrics_body() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode discovery metrics: {}", e);
    }

    match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(e) => {
            error!("discovery metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
