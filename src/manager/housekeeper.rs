//! The housekeeper (§4.7): one thread multiplexing four independent periodic tasks over
//! `crossbeam_channel::tick`.

use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};

use crate::attributes::AttributeCache;
use crate::config::HousekeeperConfig;
use crate::graph::TopologyGraph;
use crate::identity::StableIdProvider;
use crate::lru::KeyedLru;
use crate::manager::state::{AppFlowState, TransportFlowState};
use crate::records::{FlowSourceRecord, Pair, ProcPairRecord, Record};
use crate::store::RecordStore;

/// The minimum time a transport flow must sit unreconciled before it is promoted to a
/// `FlowSourceRecord` (§3, §4.7): short-lived flows that reconcile quickly should never produce one.
const FLOW_SOURCE_MIN_AGE: Duration = Duration::from_secs(15);

/// Drops flows that have not been touched within `ttl` from both flow tables, deletes the evicted
/// transport ids from the enriched store too, and logs terminated and stale evictions separately.
///
/// A flow that completed normally (`terminated`) aged out after its own observations were already
/// fully emitted; one that never completed (`stale`) aged out mid-flight. Both leave the flow
/// tables, but only `terminated` flows are expected — a steady stream of `stale` evictions points at
/// something upstream never delivering an end-time.
pub fn purge_flows(
    transport: &KeyedLru<String, TransportFlowState>,
    app: &KeyedLru<String, AppFlowState>,
    store: &RecordStore,
    ttl: Duration,
) -> usize {
    let now = Instant::now();
    let evicted_transport = transport.evict_while(|s| now.duration_since(s.last_touched) >= ttl);
    let evicted_app = app.evict_while(|s| now.duration_since(s.last_touched) >= ttl);

    let (terminated, stale): (Vec<_>, Vec<_>) =
        evicted_transport.iter().partition(|s| s.terminated);
    for state in &evicted_transport {
        store.delete(&state.record.id);
    }
    log::info!("purge_flows evicted {} terminated transport flows", terminated.len());
    log::info!("purge_flows evicted {} stale transport flows", stale.len());

    evicted_transport.len() + evicted_app.len()
}

/// Rebuilds the process-pair table from every `ConnectionRecord` currently in the store.
///
/// Runs far more often than the other tasks (§4.7: every three seconds) because process pairs are
/// purely derived state with no upstream event of their own; re-deriving from scratch each tick is
/// simpler than maintaining incremental add/remove bookkeeping and cheap enough at this cadence.
pub fn rebuild_pairs(store: &RecordStore, idp: &StableIdProvider) -> usize {
    let mut seen = std::collections::HashSet::new();
    let mut created = 0;
    for record in store.list() {
        let Some(conn) = record.as_connection() else {
            continue;
        };
        let pair = Pair {
            source: conn.source.id.clone(),
            dest: conn.dest.id.clone(),
            protocol: conn.protocol.clone(),
        };
        if !seen.insert(pair.clone()) {
            continue;
        }
        let id = idp.id("processpair", &[&pair.source, &pair.dest, &pair.protocol]);
        if store.get(&id).is_some() {
            continue;
        }
        store.add(Record::ProcPair(ProcPairRecord {
            id,
            source: pair.source,
            dest: pair.dest,
            protocol: pair.protocol,
            start: conn.start_time,
        }));
        created += 1;
    }
    created
}

/// Resolves the site a transport flow's listener sits under, walking listener -> router -> site.
fn resolve_site(graph: &dyn TopologyGraph, listener_id: &str) -> Option<String> {
    let listener = graph.listener(listener_id)?;
    let router = graph.parent(&listener)?;
    let site = graph.parent(&router)?;
    Some(site.id().to_string())
}

/// Promotes transport flows that have sat unreconciled for at least [`FLOW_SOURCE_MIN_AGE`] to
/// `FlowSourceRecord`s, recording that traffic was observed from a (site, host) pair before its
/// process was known.
///
/// Skips any flow whose metrics are already bound: a flow that reconciles before the age gate fires
/// never needed this fallback, and one that reconciles after having been recorded here simply leaves
/// a stale `FlowSourceRecord` behind, which is harmless (§4.7).
pub fn reconcile_flow_source(
    transport: &KeyedLru<String, TransportFlowState>,
    store: &RecordStore,
    idp: &StableIdProvider,
    graph: &dyn TopologyGraph,
) -> usize {
    let now = Instant::now();
    let mut created = 0;
    for state in transport.items() {
        if state.metric_set.is_some() {
            continue;
        }
        if now.duration_since(state.first_seen) < FLOW_SOURCE_MIN_AGE {
            continue;
        }
        let (Some(host), Some(listener_id)) = (&state.record.source_host, &state.record.parent) else {
            continue;
        };
        let Some(site) = resolve_site(graph, listener_id) else {
            continue;
        };

        let id = idp.id("flowsource", &[&site, host]);
        if store.get(&id).is_some() {
            continue;
        }
        store.add(Record::FlowSource(FlowSourceRecord {
            id,
            site,
            host: host.clone(),
            start: chrono::Utc::now(),
        }));
        created += 1;
    }
    created
}

/// Spawns the housekeeper loop, returning once `cancel` fires.
///
/// A single thread multiplexes all four tasks via one `select!`, matching the source's one-routine
/// pattern rather than a timer per task: the tasks never run concurrently with each other, so they
/// can freely share the attribute cache and record store without additional synchronization beyond
/// what those types already provide.
#[allow(clippy::too_many_arguments)]
pub fn run(
    cancel: &Receiver<()>,
    config: &HousekeeperConfig,
    transport: &KeyedLru<String, TransportFlowState>,
    app: &KeyedLru<String, AppFlowState>,
    store: &RecordStore,
    attrs: &AttributeCache,
    idp: &StableIdProvider,
    graph: &dyn TopologyGraph,
    ttl: Duration,
) {
    let reconcile_flow_source_tick =
        crossbeam_channel::tick(Duration::from_secs(config.reconcile_flow_source_interval_seconds));
    let invalidate_cache_tick =
        crossbeam_channel::tick(Duration::from_secs(config.invalidate_cache_interval_seconds));
    let purge_flows_tick = crossbeam_channel::tick(Duration::from_secs(config.purge_flows_interval_seconds));
    let rebuild_pairs_tick =
        crossbeam_channel::tick(Duration::from_secs(config.rebuild_pairs_interval_seconds));

    loop {
        select! {
            recv(cancel) -> _ => return,
            recv(reconcile_flow_source_tick) -> _ => {
                let n = reconcile_flow_source(transport, store, idp, graph);
                log::debug!("reconcile_flow_source created {n} flow-source records");
            }
            recv(invalidate_cache_tick) -> _ => {
                attrs.invalidate();
                log::debug!("invalidated attribute cache");
            }
            recv(purge_flows_tick) -> _ => {
                let n = purge_flows(transport, app, store, ttl);
                log::debug!("purge_flows evicted {n} stale flows");
            }
            recv(rebuild_pairs_tick) -> _ => {
                let n = rebuild_pairs(store, idp);
                log::debug!("rebuild_pairs created {n} process-pair records");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InMemoryGraph, Node, NodeKind};
    use crate::records::{ConnectionRecord, NamedReference, TransportBiflowRecord};
    use crate::metrics::{Metrics, MetricSetCache, LabelSet};
    use prometheus_client::registry::Registry;

    fn connection(id: &str, source: &str, dest: &str, protocol: &str, metrics: &MetricSetCache) -> ConnectionRecord {
        let labels = LabelSet {
            source_process: source.into(),
            dest_process: dest.into(),
            source_site_id: "s1".into(),
            source_site_name: "site-1".into(),
            dest_site_id: "s2".into(),
            dest_site_name: "site-2".into(),
            routing_key: "rk".into(),
            protocol: protocol.into(),
        };
        ConnectionRecord {
            id: id.into(),
            start_time: chrono::Utc::now(),
            end_time: chrono::Utc::now(),
            routing_key: "rk".into(),
            protocol: protocol.into(),
            connector_host: String::new(),
            connector_port: String::new(),
            source: NamedReference::with_id(source),
            source_site: NamedReference::with_id("s1"),
            source_router: NamedReference::with_id("r1"),
            dest: NamedReference::with_id(dest),
            dest_site: NamedReference::with_id("s2"),
            dest_router: NamedReference::with_id("r2"),
            connector: NamedReference::with_id("c1"),
            listener: NamedReference::with_id("l1"),
            source_group: NamedReference::with_id("g1"),
            dest_group: NamedReference::with_id("g2"),
            metrics: metrics.transport_metric_set(&labels),
        }
    }

    fn transport_record(id: &str) -> TransportBiflowRecord {
        TransportBiflowRecord {
            id: id.into(),
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

    #[test]
    fn rebuild_pairs_dedupes_by_source_dest_protocol() {
        let store = RecordStore::new();
        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));
        store.add(Record::Connection(connection("c1", "p1", "p2", "tcp", &metrics)));
        store.add(Record::Connection(connection("c2", "p1", "p2", "tcp", &metrics)));
        let idp = StableIdProvider::new();
        let created = rebuild_pairs(&store, &idp);
        assert_eq!(created, 1);
        let pairs = store.index(|r| matches!(r, Record::ProcPair(_)));
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn rebuild_pairs_is_idempotent() {
        let store = RecordStore::new();
        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));
        store.add(Record::Connection(connection("c1", "p1", "p2", "tcp", &metrics)));
        let idp = StableIdProvider::new();
        assert_eq!(rebuild_pairs(&store, &idp), 1);
        assert_eq!(rebuild_pairs(&store, &idp), 0);
    }

    #[test]
    fn purge_flows_evicts_only_stale_entries_and_deletes_enriched_record() {
        let transport: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let app: KeyedLru<String, AppFlowState> = KeyedLru::new();
        let store = RecordStore::new();
        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));

        transport.push("t1".into(), TransportFlowState::new(transport_record("t1")));
        store.add(Record::Connection(connection("t1", "p1", "p2", "tcp", &metrics)));

        let evicted = purge_flows(&transport, &app, &store, Duration::from_secs(0));
        assert_eq!(evicted, 1);
        assert!(transport.is_empty());
        assert!(store.get("t1").is_none());
    }

    #[test]
    fn purge_flows_logs_terminated_and_stale_separately() {
        let transport: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let app: KeyedLru<String, AppFlowState> = KeyedLru::new();
        let store = RecordStore::new();

        let mut terminated = TransportFlowState::new(transport_record("t1"));
        terminated.terminated = true;
        transport.push("t1".into(), terminated);
        transport.push("t2".into(), TransportFlowState::new(transport_record("t2")));

        let evicted = purge_flows(&transport, &app, &store, Duration::from_secs(0));
        assert_eq!(evicted, 2);
    }

    fn graph_with_listener() -> InMemoryGraph {
        let mut graph = InMemoryGraph::new();
        graph.insert(Node::new("site1", NodeKind::Site));
        graph.insert(Node::new("router1", NodeKind::Router).with_parent("site1"));
        graph.insert(Node::new("listener1", NodeKind::Listener).with_parent("router1"));
        graph
    }

    #[test]
    fn reconcile_flow_source_skips_flows_under_the_age_gate() {
        let graph = graph_with_listener();
        let transport: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let store = RecordStore::new();
        let idp = StableIdProvider::new();

        let mut state = TransportFlowState::new(transport_record("t1"));
        state.record.parent = Some("listener1".into());
        state.record.source_host = Some("10.0.0.1".into());
        transport.push("t1".into(), state);

        assert_eq!(reconcile_flow_source(&transport, &store, &idp, &graph), 0);
    }

    #[test]
    fn reconcile_flow_source_skips_flows_with_bound_metrics() {
        let graph = graph_with_listener();
        let transport: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let store = RecordStore::new();
        let idp = StableIdProvider::new();
        let mut registry = Registry::default();
        let metrics = MetricSetCache::new(Metrics::new(&mut registry, "test"));

        let mut state = TransportFlowState::new(transport_record("t1"));
        state.record.parent = Some("listener1".into());
        state.record.source_host = Some("10.0.0.1".into());
        state.first_seen -= FLOW_SOURCE_MIN_AGE + Duration::from_secs(1);
        state.metric_set = Some(metrics.transport_metric_set(&LabelSet::default()));
        transport.push("t1".into(), state);

        assert_eq!(reconcile_flow_source(&transport, &store, &idp, &graph), 0);
    }

    #[test]
    fn reconcile_flow_source_keys_by_resolved_site_not_listener() {
        let graph = graph_with_listener();
        let transport: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let store = RecordStore::new();
        let idp = StableIdProvider::new();

        let mut state = TransportFlowState::new(transport_record("t1"));
        state.record.parent = Some("listener1".into());
        state.record.source_host = Some("10.0.0.1".into());
        state.first_seen -= FLOW_SOURCE_MIN_AGE + Duration::from_secs(1);
        transport.push("t1".into(), state);

        assert_eq!(reconcile_flow_source(&transport, &store, &idp, &graph), 1);
        let expected_id = idp.id("flowsource", &["site1", "10.0.0.1"]);
        let record = store.get(&expected_id).unwrap();
        match record {
            Record::FlowSource(r) => assert_eq!(r.site, "site1"),
            other => panic!("expected a FlowSource record, got {other:?}"),
        }
    }

    #[test]
    fn reconcile_flow_source_skips_unresolvable_listener() {
        let graph = InMemoryGraph::new();
        let transport: KeyedLru<String, TransportFlowState> = KeyedLru::new();
        let store = RecordStore::new();
        let idp = StableIdProvider::new();

        let mut state = TransportFlowState::new(transport_record("t1"));
        state.record.parent = Some("nope".into());
        state.record.source_host = Some("10.0.0.1".into());
        state.first_seen -= FLOW_SOURCE_MIN_AGE + Duration::from_secs(1);
        transport.push("t1".into(), state);

        assert_eq!(reconcile_flow_source(&transport, &store, &idp, &graph), 0);
    }
}
