//! Metrics registry and the metric-set cache (§4.5).
//!
//! The registry half of this module plays the role of "metrics registry interface (consumed)" in
//! §6: callers obtain [`Metrics`] once (backed by a process-wide [`Registry`]) and pass it to
//! [`crate::manager::ConnectionManager::new`]. The cache half memoizes, per distinct label-set, the
//! already-`get_or_create`d counter/histogram handles so the hot ingestion path never touches the
//! registry's internal maps.
//!
//! `prometheus_client`'s `Family::get_or_create` returns a short-lived guard rather than an owned
//! handle; every counter/gauge/histogram type it wraps is cheap to `Clone` (an `Arc` around an
//! atomic or a small lock), so — following this crate's own `stats::prometheus` module, which
//! resolves a `Family<CoreId, Counter>` once per core and clones the result into a
//! thread-local struct — the cache resolves each handle once and stores the owned clone.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex};

use prometheus_client::encoding::{EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// The label dimensions shared by every transport-scoped metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet {
    pub source_process: String,
    pub dest_process: String,
    pub source_site_id: String,
    pub source_site_name: String,
    pub dest_site_id: String,
    pub dest_site_name: String,
    pub routing_key: String,
    pub protocol: String,
}

impl LabelSet {
    /// Swaps source/dest process and site fields, used to pre-curry the legacy "outgoing"
    /// direction latency observer (§4.5).
    pub fn swapped(&self) -> LabelSet {
        LabelSet {
            source_process: self.dest_process.clone(),
            dest_process: self.source_process.clone(),
            source_site_id: self.dest_site_id.clone(),
            source_site_name: self.dest_site_name.clone(),
            dest_site_id: self.source_site_id.clone(),
            dest_site_name: self.source_site_name.clone(),
            routing_key: self.routing_key.clone(),
            protocol: self.protocol.clone(),
        }
    }
}

fn encode_label(encoder: &mut LabelSetEncoder<'_>, key: &str, value: &str) -> Result<(), std::fmt::Error> {
    let mut label = encoder.encode_label();
    let mut k = label.encode_label_key()?;
    k.write_str(key)?;
    let mut v = k.encode_label_value()?;
    v.write_str(value)?;
    v.finish()
}

impl EncodeLabelSet for LabelSet {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        encode_label(&mut encoder, "source_process", &self.source_process)?;
        encode_label(&mut encoder, "dest_process", &self.dest_process)?;
        encode_label(&mut encoder, "source_site_id", &self.source_site_id)?;
        encode_label(&mut encoder, "source_site_name", &self.source_site_name)?;
        encode_label(&mut encoder, "dest_site_id", &self.dest_site_id)?;
        encode_label(&mut encoder, "dest_site_name", &self.dest_site_name)?;
        encode_label(&mut encoder, "routing_key", &self.routing_key)?;
        encode_label(&mut encoder, "protocol", &self.protocol)?;
        Ok(())
    }
}

/// [`LabelSet`] plus the synthetic `direction` tag used for the legacy latency observers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegacyLabelSet {
    pub base: LabelSet,
    pub direction: &'static str,
}

impl EncodeLabelSet for LegacyLabelSet {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        encode_label(&mut encoder, "source_process", &self.base.source_process)?;
        encode_label(&mut encoder, "dest_process", &self.base.dest_process)?;
        encode_label(&mut encoder, "source_site_id", &self.base.source_site_id)?;
        encode_label(&mut encoder, "source_site_name", &self.base.source_site_name)?;
        encode_label(&mut encoder, "dest_site_id", &self.base.dest_site_id)?;
        encode_label(&mut encoder, "dest_site_name", &self.base.dest_site_name)?;
        encode_label(&mut encoder, "routing_key", &self.base.routing_key)?;
        encode_label(&mut encoder, "protocol", &self.base.protocol)?;
        encode_label(&mut encoder, "direction", self.direction)
    }
}

/// Full label set for the request counter: [`LabelSet`]'s dimensions minus the transport
/// `protocol`, plus the app-level `protocol`/`method`/`code` supplied at observation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestLabelSet {
    pub source_process: String,
    pub dest_process: String,
    pub source_site_id: String,
    pub source_site_name: String,
    pub dest_site_id: String,
    pub dest_site_name: String,
    pub routing_key: String,
    pub protocol: String,
    pub method: String,
    pub code: String,
}

impl EncodeLabelSet for RequestLabelSet {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        encode_label(&mut encoder, "source_process", &self.source_process)?;
        encode_label(&mut encoder, "dest_process", &self.dest_process)?;
        encode_label(&mut encoder, "source_site_id", &self.source_site_id)?;
        encode_label(&mut encoder, "source_site_name", &self.source_site_name)?;
        encode_label(&mut encoder, "dest_site_id", &self.dest_site_id)?;
        encode_label(&mut encoder, "dest_site_name", &self.dest_site_name)?;
        encode_label(&mut encoder, "routing_key", &self.routing_key)?;
        encode_label(&mut encoder, "protocol", &self.protocol)?;
        encode_label(&mut encoder, "method", &self.method)?;
        encode_label(&mut encoder, "code", &self.code)?;
        Ok(())
    }
}

/// Reason a flow is pending enrichment, curried with its event source and record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingLabel {
    pub eventsource: String,
    pub record_type: &'static str,
    pub reason: &'static str,
}

impl EncodeLabelSet for PendingLabel {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        encode_label(&mut encoder, "eventsource", &self.eventsource)?;
        encode_label(&mut encoder, "type", self.record_type)?;
        encode_label(&mut encoder, "reason", self.reason)
    }
}

/// Labels the internal per-component processing-time histogram.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentLabel {
    pub eventsource: String,
    pub component: &'static str,
}

impl EncodeLabelSet for ComponentLabel {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        encode_label(&mut encoder, "eventsource", &self.eventsource)?;
        encode_label(&mut encoder, "component", self.component)
    }
}

fn histogram_buckets() -> impl Iterator<Item = f64> {
    [
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
    .into_iter()
}

/// The process-wide metrics registry and the metric families this crate registers on it.
///
/// Cloning is cheap: every field is a `Family`, which is internally reference-counted, matching
/// how `prometheus_client::metrics::family::Family` is designed to be shared between threads.
#[derive(Clone)]
pub struct Metrics {
    pub flow_opened: Family<LabelSet, Counter>,
    pub flow_closed: Family<LabelSet, Counter>,
    pub flow_bytes_sent: Family<LabelSet, Counter>,
    pub flow_bytes_received: Family<LabelSet, Counter>,
    pub flow_latency: Family<LabelSet, Histogram>,
    pub flow_latency_legacy: Family<LegacyLabelSet, Histogram>,
    pub requests_total: Family<RequestLabelSet, Counter>,
    pub pending_flows: Family<PendingLabel, Gauge>,
    pub component_time: Family<ComponentLabel, Histogram>,
}

impl Metrics {
    /// Registers every family this crate owns on `registry`, under `namespace`.
    pub fn new(registry: &mut Registry, namespace: &str) -> Self {
        let flow_opened = Family::<LabelSet, Counter>::default();
        let flow_closed = Family::<LabelSet, Counter>::default();
        let flow_bytes_sent = Family::<LabelSet, Counter>::default();
        let flow_bytes_received = Family::<LabelSet, Counter>::default();
        let flow_latency =
            Family::<LabelSet, Histogram>::new_with_constructor(|| Histogram::new(histogram_buckets()));
        let flow_latency_legacy = Family::<LegacyLabelSet, Histogram>::new_with_constructor(|| {
            Histogram::new(histogram_buckets())
        });
        let requests_total = Family::<RequestLabelSet, Counter>::default();
        let pending_flows = Family::<PendingLabel, Gauge>::default();
        let component_time = Family::<ComponentLabel, Histogram>::new_with_constructor(|| {
            Histogram::new(histogram_buckets())
        });

        registry.register(
            format!("{namespace}_flow_opened"),
            "Transport flows that have been observed as opened.",
            flow_opened.clone(),
        );
        registry.register(
            format!("{namespace}_flow_closed"),
            "Transport flows that have been observed as closed.",
            flow_closed.clone(),
        );
        registry.register(
            format!("{namespace}_flow_bytes_sent"),
            "Cumulative bytes sent, by enriched dimension.",
            flow_bytes_sent.clone(),
        );
        registry.register(
            format!("{namespace}_flow_bytes_received"),
            "Cumulative bytes received, by enriched dimension.",
            flow_bytes_received.clone(),
        );
        registry.register(
            format!("{namespace}_flow_latency_seconds"),
            "Connection round-trip latency delta.",
            flow_latency.clone(),
        );
        registry.register(
            format!("{namespace}_flow_latency_legacy_microseconds"),
            "Directional latency, retained for backwards compatibility.",
            flow_latency_legacy.clone(),
        );
        registry.register(
            format!("{namespace}_requests_total"),
            "Application requests, by method and response class.",
            requests_total.clone(),
        );
        registry.register(
            format!("{namespace}_pending_flows"),
            "Flows awaiting a specific piece of enrichment data.",
            pending_flows.clone(),
        );
        registry.register(
            format!("{namespace}_reconcile_seconds"),
            "Time spent per internal reconciliation component.",
            component_time.clone(),
        );

        Metrics {
            flow_opened,
            flow_closed,
            flow_bytes_sent,
            flow_bytes_received,
            flow_latency,
            flow_latency_legacy,
            requests_total,
            pending_flows,
            component_time,
        }
    }
}

/// Bound handles for a single transport label-set: everything ingestion needs to observe a
/// transport flow without touching the registry again.
#[derive(Debug)]
pub struct TransportMetricSet {
    pub opened: Counter,
    pub closed: Counter,
    pub sent: Counter,
    pub received: Counter,
    pub latency: Histogram,
    pub latency_legacy: Histogram,
    pub latency_legacy_reverse: Histogram,
}

impl Default for TransportMetricSet {
    fn default() -> Self {
        TransportMetricSet {
            opened: Counter::default(),
            closed: Counter::default(),
            sent: Counter::default(),
            received: Counter::default(),
            latency: Histogram::new(histogram_buckets()),
            latency_legacy: Histogram::new(histogram_buckets()),
            latency_legacy_reverse: Histogram::new(histogram_buckets()),
        }
    }
}

/// Bound handles for a single request label-set.
///
/// `requests` is the shared family handle rather than a fully resolved `Counter`: the `protocol`,
/// `method`, and `code` dimensions are only known once a request terminates, so the remaining
/// fixed dimensions are carried in `fixed` and combined with those three at observation time. This
/// is this crate's translation of the source's `CounterVec.MustCurryWith` call: we cannot partially
/// curry a `prometheus_client` `Family`, so the cache instead remembers the fixed portion of the
/// label set and defers the full key construction to `observe`.
#[derive(Debug)]
pub struct AppMetricSet {
    requests: Family<RequestLabelSet, Counter>,
    fixed: LabelSet,
}

impl AppMetricSet {
    pub fn observe(&self, protocol: &str, method: &str, code: &str) {
        let key = RequestLabelSet {
            source_process: self.fixed.source_process.clone(),
            dest_process: self.fixed.dest_process.clone(),
            source_site_id: self.fixed.source_site_id.clone(),
            source_site_name: self.fixed.source_site_name.clone(),
            dest_site_id: self.fixed.dest_site_id.clone(),
            dest_site_name: self.fixed.dest_site_name.clone(),
            routing_key: self.fixed.routing_key.clone(),
            protocol: protocol.to_string(),
            method: method.to_string(),
            code: code.to_string(),
        };
        self.requests.get_or_create(&key).inc();
    }
}

/// Memoizes curried metric handles per label-set (§4.5).
///
/// A single mutex guards both maps, matching the locking discipline in §5 (the metric-set-cache
/// lock is always acquired on its own, never nested under another of the manager's locks).
pub struct MetricSetCache {
    metrics: Metrics,
    transport: Mutex<HashMap<LabelSet, Arc<TransportMetricSet>>>,
    app: Mutex<HashMap<LabelSet, Arc<AppMetricSet>>>,
}

impl MetricSetCache {
    pub fn new(metrics: Metrics) -> Self {
        MetricSetCache {
            metrics,
            transport: Mutex::new(HashMap::new()),
            app: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport_metric_set(&self, labels: &LabelSet) -> Arc<TransportMetricSet> {
        let mut cache = self.transport.lock().unwrap();
        if let Some(m) = cache.get(labels) {
            return m.clone();
        }
        let swapped = labels.swapped();
        let legacy_in = LegacyLabelSet {
            base: labels.clone(),
            direction: "incoming",
        };
        let legacy_out = LegacyLabelSet {
            base: swapped,
            direction: "outgoing",
        };
        let set = Arc::new(TransportMetricSet {
            opened: self.metrics.flow_opened.get_or_create(labels).clone(),
            closed: self.metrics.flow_closed.get_or_create(labels).clone(),
            sent: self.metrics.flow_bytes_sent.get_or_create(labels).clone(),
            received: self.metrics.flow_bytes_received.get_or_create(labels).clone(),
            latency: self.metrics.flow_latency.get_or_create(labels).clone(),
            latency_legacy: self
                .metrics
                .flow_latency_legacy
                .get_or_create(&legacy_in)
                .clone(),
            latency_legacy_reverse: self
                .metrics
                .flow_latency_legacy
                .get_or_create(&legacy_out)
                .clone(),
        });
        cache.insert(labels.clone(), set.clone());
        set
    }

    pub fn app_metric_set(&self, labels: &LabelSet) -> Arc<AppMetricSet> {
        let mut cache = self.app.lock().unwrap();
        if let Some(m) = cache.get(labels) {
            return m.clone();
        }
        let set = Arc::new(AppMetricSet {
            requests: self.metrics.requests_total.clone(),
            fixed: labels.clone(),
        });
        cache.insert(labels.clone(), set.clone());
        set
    }

    pub fn pending_gauge(&self, eventsource: &str, record_type: &'static str, reason: &'static str) -> Gauge {
        self.metrics
            .pending_flows
            .get_or_create(&PendingLabel {
                eventsource: eventsource.to_string(),
                record_type,
                reason,
            })
            .clone()
    }

    pub fn component_timer(&self, eventsource: &str, component: &'static str) -> Histogram {
        self.metrics
            .component_time
            .get_or_create(&ComponentLabel {
                eventsource: eventsource.to_string(),
                component,
            })
            .clone()
    }
}
