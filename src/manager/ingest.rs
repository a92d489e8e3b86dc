//! Ingestion handlers (§4.2): the event-source callbacks installed on construction.
//!
//! A flow with no bound metric-set only has its raw record and bookkeeping updated here; the
//! reconciler binds the metric-set. Once bound, ingestion emits directly against it (counters and
//! observers are lock-free handles once `get_or_create`d) rather than waiting for another
//! reconciliation pass, since reconciling an already-bound state is a no-op (§8).

use std::time::Instant;

use crate::http::{normalize_method, normalize_response_class};
use crate::lru::KeyedLru;
use crate::manager::state::{AppFlowState, TransportFlowState};
use crate::metrics::{AppMetricSet, TransportMetricSet};
use crate::records::{AppBiflowRecord, Record, TransportBiflowRecord};
use crate::store::RecordStore;

/// Adds or merges a transport biflow record into the transport flow table.
///
/// Always pushes to the back of the table, whether this is a brand-new flow, a revision of one
/// already held but unbound, or a replay against an already-bound one: the table's front-to-back
/// order only has to reflect recency of *any* touch for the housekeeper's purge scan to be correct.
pub fn on_transport_upsert(table: &KeyedLru<String, TransportFlowState>, record: TransportBiflowRecord) {
    let id = record.id.clone();
    let mut state = table
        .get(&id)
        .unwrap_or_else(|| TransportFlowState::new(record.clone()));

    match state.metric_set.clone() {
        None => state.merge(record),
        Some(metrics) => {
            state.record = record;
            state.last_touched = Instant::now();
            observe_transport(&mut state, &metrics);
        }
    }

    table.push(id, state);
}

/// Emits every not-yet-observed transport metric against `metrics`, given the state's current raw
/// record, then advances the state's one-shot flags and cumulative byte totals.
fn observe_transport(state: &mut TransportFlowState, metrics: &TransportMetricSet) {
    if !state.opened {
        metrics.opened.inc();
        state.opened = true;
    }

    if !state.terminated {
        if let (Some(start), Some(end)) = (state.record.start_time, state.record.end_time) {
            if end >= start {
                metrics.closed.inc();
                state.terminated = true;
            }
        }
    }

    if !state.latency_set {
        if let (Some(us), Some(us_reverse)) = (state.record.latency, state.record.latency_reverse) {
            let seconds = us as f64 / 1_000_000.0;
            metrics.latency.observe(seconds);
            metrics.latency_legacy.observe(seconds);
            metrics.latency_legacy_reverse.observe(us_reverse as f64 / 1_000_000.0);
            state.latency_set = true;
        }
    }

    // sentInc/receivedInc: only add the delta over what was already counted, and only if the
    // reverse direction has itself advanced (the source's own debounce policy, preserved as-is).
    let octets = state.record.octets.unwrap_or(state.bytes_sent);
    let octets_reverse = state.record.octets_reverse.unwrap_or(state.bytes_received);
    let sent_inc = octets.saturating_sub(state.bytes_sent);
    let received_inc = octets_reverse.saturating_sub(state.bytes_received);
    if received_inc != 0 {
        metrics.sent.inc_by(sent_inc);
        metrics.received.inc_by(received_inc);
        state.bytes_sent = octets;
        state.bytes_received = octets_reverse;
    }
}

pub fn on_transport_delete(table: &KeyedLru<String, TransportFlowState>, id: &str) {
    table.pop(&id.to_string());
}

/// Adds or merges an application biflow record into the application flow table, analogous to
/// [`on_transport_upsert`] but with only a terminated transition emitting one request-counter
/// increment.
pub fn on_app_upsert(table: &KeyedLru<String, AppFlowState>, record: AppBiflowRecord) {
    let id = record.id.clone();
    let mut state = table.get(&id).unwrap_or_else(|| AppFlowState::new(record.clone()));

    match state.metric_set.clone() {
        None => {
            state.merge(record);
        }
        Some(metrics) => {
            state.record = record;
            state.last_touched = Instant::now();
            observe_app(&mut state, &metrics);
        }
    }

    table.push(id, state);
}

fn observe_app(state: &mut AppFlowState, metrics: &AppMetricSet) {
    if state.terminated {
        return;
    }
    if state.record.end_time.is_none() {
        return;
    }
    let method = normalize_method(state.record.method.as_deref().unwrap_or(""));
    let code = normalize_response_class(state.record.result.as_deref().unwrap_or(""));
    let protocol = state.record.protocol.clone().unwrap_or_default();
    metrics.observe(&protocol, method, code);
    state.terminated = true;
}

pub fn on_app_delete(table: &KeyedLru<String, AppFlowState>, id: &str) {
    table.pop(&id.to_string());
}

/// Forwards a topology attribute record straight into the enriched record store.
///
/// Topology records have no "dirty" concept of their own: they are immediately authoritative, and
/// any attribute cache entries derived from the previous revision of this id are invalidated so the
/// next lookup recomputes from the new data.
pub fn on_topology_upsert(store: &RecordStore, attrs: &crate::attributes::AttributeCache, record: Record) {
    store.add(record);
    attrs.invalidate();
}

pub fn on_topology_delete(store: &RecordStore, attrs: &crate::attributes::AttributeCache, id: &str) {
    store.delete(id);
    attrs.invalidate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{LabelSet, Metrics, MetricSetCache};
    use crate::records::SiteRecord;
    use prometheus_client::registry::Registry;

    fn transport(id: &str) -> TransportBiflowRecord {
        TransportBiflowRecord {
            id: id.to_string(),
            parent: None,
            connector_id: None,
            source_host: None,
            start_time: None,
            end_time: None,
            octets: None,
            octets_reverse: None,
            latency: None,
            latency_reverse: None,
        }
    }

    fn labels() -> LabelSet {
        LabelSet {
            source_process: "p1".into(),
            dest_process: "p2".into(),
            source_site_id: "s1".into(),
            source_site_name: "site-1".into(),
            dest_site_id: "s2".into(),
            dest_site_name: "site-2".into(),
            routing_key: "rk".into(),
            protocol: "tcp".into(),
        }
    }

    #[test]
    fn upsert_creates_then_merges_while_unbound() {
        let table: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        on_transport_upsert(&table, transport("t1"));
        assert_eq!(table.len(), 1);
        on_transport_upsert(&table, transport("t1"));
        assert_eq!(table.len(), 1);
        assert!(table.get(&"t1".to_string()).unwrap().dirty);
    }

    #[test]
    fn delete_removes_from_table() {
        let table: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        on_transport_upsert(&table, transport("t1"));
        on_transport_delete(&table, "t1");
        assert!(table.is_empty());
    }

    #[test]
    fn topology_upsert_invalidates_cache() {
        let store = RecordStore::new();
        let attrs = crate::attributes::AttributeCache::new();
        on_topology_upsert(
            &store,
            &attrs,
            Record::Site(SiteRecord {
                id: "site1".into(),
                name: Some("site-1".into()),
            }),
        );
        assert!(store.get("site1").is_some());
    }

    #[test]
    fn bound_state_emits_byte_deltas_gated_on_received_advancing() {
        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));
        let metric_set = metrics.transport_metric_set(&labels());

        let table: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let mut state = TransportFlowState::new(transport("t1"));
        state.metric_set = Some(metric_set);
        table.push("t1".into(), state);

        let mut record = transport("t1");
        record.octets = Some(100);
        // octets_reverse absent: receivedInc computes to 0, so nothing is emitted yet.
        on_transport_upsert(&table, record);
        let state = table.get(&"t1".to_string()).unwrap();
        assert_eq!(state.bytes_sent, 0);
        assert_eq!(state.bytes_received, 0);

        let mut record = transport("t1");
        record.octets = Some(100);
        record.octets_reverse = Some(50);
        on_transport_upsert(&table, record);
        let state = table.get(&"t1".to_string()).unwrap();
        assert_eq!(state.bytes_sent, 100);
        assert_eq!(state.bytes_received, 50);

        // Re-delivering the same totals is a no-op: receivedInc is 0 again.
        let mut record = transport("t1");
        record.octets = Some(100);
        record.octets_reverse = Some(50);
        on_transport_upsert(&table, record);
        let state = table.get(&"t1".to_string()).unwrap();
        assert_eq!(state.bytes_sent, 100);
        assert_eq!(state.bytes_received, 50);
    }

    #[test]
    fn bound_state_closed_requires_end_after_start() {
        use chrono::{Duration as ChronoDuration, Utc};

        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));
        let metric_set = metrics.transport_metric_set(&labels());

        let table: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let mut state = TransportFlowState::new(transport("t1"));
        state.metric_set = Some(metric_set);
        table.push("t1".into(), state);

        let now = Utc::now();
        let mut record = transport("t1");
        record.start_time = Some(now);
        record.end_time = Some(now - ChronoDuration::seconds(5));
        on_transport_upsert(&table, record);
        assert!(!table.get(&"t1".to_string()).unwrap().terminated);

        let mut record = transport("t1");
        record.start_time = Some(now);
        record.end_time = Some(now + ChronoDuration::seconds(5));
        on_transport_upsert(&table, record);
        assert!(table.get(&"t1".to_string()).unwrap().terminated);
    }

    #[test]
    fn unbound_state_never_touches_metrics() {
        let table: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let mut record = transport("t1");
        record.octets = Some(100);
        record.octets_reverse = Some(50);
        on_transport_upsert(&table, record);
        let state = table.get(&"t1".to_string()).unwrap();
        assert_eq!(state.bytes_sent, 0);
        assert!(state.metric_set.is_none());
    }

    #[test]
    fn bound_app_state_observes_once_on_termination() {
        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));
        let metric_set = metrics.app_metric_set(&labels());

        let table: KeyedLru<String, AppFlowState> = KeyedLru::new();
        let mut state = AppFlowState::new(AppBiflowRecord {
            id: "a1".into(),
            parent: Some("t1".into()),
            start_time: None,
            end_time: None,
            protocol: Some("http".into()),
            method: Some("GET".into()),
            result: None,
        });
        state.metric_set = Some(metric_set);
        table.push("a1".into(), state);

        let record = AppBiflowRecord {
            id: "a1".into(),
            parent: Some("t1".into()),
            start_time: None,
            end_time: Some(chrono::Utc::now()),
            protocol: Some("http".into()),
            method: Some("GET".into()),
            result: Some("204".into()),
        };
        on_app_upsert(&table, record.clone());
        assert!(table.get(&"a1".to_string()).unwrap().terminated);

        // A second delivery after termination must not observe again.
        on_app_upsert(&table, record);
        assert!(table.get(&"a1".to_string()).unwrap().terminated);
    }
}
