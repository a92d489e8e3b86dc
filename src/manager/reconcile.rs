//! Reconciliation: turning a raw biflow record plus topology into an enriched output record
//! (§4.3, §4.4).

use crate::attributes::AttributeCache;
use crate::graph::TopologyGraph;
use crate::lru::KeyedLru;
use crate::manager::state::TransportFlowState;
use crate::metrics::{LabelSet, MetricSetCache};
use crate::records::{
    AppBiflowRecord, ConnectorRecord, NamedReference, RequestRecord, TransportBiflowRecord,
};
use crate::store::RecordStore;

/// Why reconciliation did not yield `Success`.
///
/// Named after what enrichment data was missing rather than which internal graph call failed, so a
/// caller deciding how to label a pending-flow gauge only needs to match on this, not re-derive the
/// reason from a `Result` error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileReason {
    Success,
    /// The raw record is missing a field reconciliation cannot proceed without.
    MissingRecord,
    /// The connector named by the record is not present in the topology.
    MissingConnector,
    /// The source process could not be resolved (missing listener, router, site, or
    /// connector-target link, or the resolved process's attributes are incomplete).
    MissingSource,
    /// The dest process could not be resolved (missing connector-target link, or the resolved
    /// process's attributes are incomplete).
    MissingDest,
    /// An application flow's parent transport flow has not even been ingested yet: no state
    /// exists for it in the transport flow table at all.
    MissingTransport,
    /// The parent transport flow is present but its own metrics are not yet bound, i.e. it has not
    /// itself been reconciled.
    UnreconciledTransport,
}

/// Every reason a transport reconciliation can fail with, for publishing an absolute pending-count
/// gauge per reason even when a reason's count is zero for the current pass.
pub const TRANSPORT_REASONS: &[ReconcileReason] = &[
    ReconcileReason::MissingRecord,
    ReconcileReason::MissingConnector,
    ReconcileReason::MissingSource,
    ReconcileReason::MissingDest,
];

/// Every reason an application reconciliation can fail with.
pub const APP_REASONS: &[ReconcileReason] = &[
    ReconcileReason::MissingRecord,
    ReconcileReason::MissingTransport,
    ReconcileReason::UnreconciledTransport,
];

impl ReconcileReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            ReconcileReason::Success => "success",
            ReconcileReason::MissingRecord => "missing_record",
            ReconcileReason::MissingConnector => "missing_connector",
            ReconcileReason::MissingSource => "missing_source",
            ReconcileReason::MissingDest => "missing_dest",
            ReconcileReason::MissingTransport => "missing_transport",
            ReconcileReason::UnreconciledTransport => "unreconciled_transport",
        }
    }
}

/// The topology-derived fields of a [`crate::records::ConnectionRecord`], everything reconciliation
/// computes beyond what is copied straight off the raw record.
pub struct ConnectionFields {
    pub source: NamedReference,
    pub source_site: NamedReference,
    pub source_router: NamedReference,
    pub source_group: NamedReference,
    pub dest: NamedReference,
    pub dest_site: NamedReference,
    pub dest_router: NamedReference,
    pub dest_group: NamedReference,
    pub connector: NamedReference,
    pub listener: NamedReference,
    pub protocol: String,
    pub routing_key: String,
    pub connector_host: String,
    pub connector_port: String,
}

/// Resolves a transport biflow record's topology neighborhood.
///
/// Source resolution walks listener -> router -> site to get the site the client connected into,
/// then asks the graph which process the connector on that site is fronting for
/// (`connector_target` then `process_of`). Dest resolution walks the connector directly to the
/// process it dials out to (`target_of`), mirroring a connector's role as the egress adapter in
/// front of a destination process.
pub fn reconcile_transport(
    graph: &dyn TopologyGraph,
    store: &RecordStore,
    attrs: &AttributeCache,
    record: &TransportBiflowRecord,
) -> Result<ConnectionFields, ReconcileReason> {
    let listener_id = record.parent.as_deref().ok_or(ReconcileReason::MissingRecord)?;
    let connector_id = record
        .connector_id
        .as_deref()
        .ok_or(ReconcileReason::MissingRecord)?;
    let source_host = record
        .source_host
        .as_deref()
        .ok_or(ReconcileReason::MissingRecord)?;

    let listener = graph.listener(listener_id).ok_or(ReconcileReason::MissingSource)?;
    let listener_router = graph.parent(&listener).ok_or(ReconcileReason::MissingSource)?;
    let listener_site = graph
        .parent(&listener_router)
        .ok_or(ReconcileReason::MissingSource)?;
    let source_target = graph
        .connector_target(listener_site.id(), source_host)
        .ok_or(ReconcileReason::MissingSource)?;
    let source_process = graph
        .process_of(&source_target)
        .ok_or(ReconcileReason::MissingSource)?;
    let source_attrs = attrs
        .process_attrs(store, source_process.id())
        .ok_or(ReconcileReason::MissingSource)?;
    let source_router = attrs
        .router_attrs(store, listener_router.id())
        .ok_or(ReconcileReason::MissingSource)?;

    let connector = graph
        .connector(connector_id)
        .ok_or(ReconcileReason::MissingConnector)?;
    let connector_record = connector_record(store, connector_id).ok_or(ReconcileReason::MissingConnector)?;
    let connector_attrs = attrs
        .connector_attrs(store, connector_id)
        .ok_or(ReconcileReason::MissingConnector)?;
    let dest_process = graph.target_of(&connector).ok_or(ReconcileReason::MissingDest)?;
    let dest_attrs = attrs
        .process_attrs(store, dest_process.id())
        .ok_or(ReconcileReason::MissingDest)?;
    let connector_router = graph.parent(&connector).ok_or(ReconcileReason::MissingDest)?;
    let dest_router = attrs
        .router_attrs(store, connector_router.id())
        .ok_or(ReconcileReason::MissingDest)?;

    Ok(ConnectionFields {
        source: source_attrs.process,
        source_site: source_attrs.site,
        source_router,
        source_group: source_attrs.group,
        dest: dest_attrs.process,
        dest_site: dest_attrs.site,
        dest_router,
        dest_group: dest_attrs.group,
        connector: connector_attrs,
        listener: NamedReference::with_id(listener_id),
        protocol: connector_record.protocol.clone().unwrap_or_default(),
        routing_key: connector_record.address.clone().unwrap_or_default(),
        connector_host: connector_record.dest_host.clone().unwrap_or_default(),
        connector_port: connector_record.dest_port.clone().unwrap_or_default(),
    })
}

fn connector_record(store: &RecordStore, id: &str) -> Option<ConnectorRecord> {
    store.get(id)?.as_connector().cloned()
}

/// Resolves an application biflow record against its already-reconciled parent connection.
///
/// Distinguishes a parent transport flow that has never been ingested (`MissingTransport`, checked
/// against `transport_table` directly) from one that has been ingested but not yet reconciled
/// (`UnreconciledTransport`, its `metric_set` still unbound) — an app flow can only itself reconcile
/// once its parent's metrics are bound, but the two absent-parent cases call for different
/// operator-facing pending reasons.
///
/// Does not observe any metric: it only resolves the label set and binds the handle onto the
/// returned record. Observation happens when the caller replays the raw record through the
/// ingestion handler after this record's metric-set is bound.
pub fn reconcile_app(
    transport_table: &KeyedLru<String, TransportFlowState>,
    store: &RecordStore,
    metric_sets: &MetricSetCache,
    record: &AppBiflowRecord,
) -> Result<RequestRecord, ReconcileReason> {
    let parent_id = record.parent.as_deref().ok_or(ReconcileReason::MissingRecord)?;
    let transport_state = transport_table
        .get(&parent_id.to_string())
        .ok_or(ReconcileReason::MissingTransport)?;
    if transport_state.metric_set.is_none() {
        return Err(ReconcileReason::UnreconciledTransport);
    }
    let parent = store
        .get(parent_id)
        .and_then(|r| r.as_connection().cloned())
        .ok_or(ReconcileReason::UnreconciledTransport)?;

    let labels = LabelSet {
        source_process: parent.source.id.clone(),
        dest_process: parent.dest.id.clone(),
        source_site_id: parent.source_site.id.clone(),
        source_site_name: parent.source_site.name.clone(),
        dest_site_id: parent.dest_site.id.clone(),
        dest_site_name: parent.dest_site.name.clone(),
        routing_key: parent.routing_key.clone(),
        protocol: parent.protocol.clone(),
    };
    let metrics = metric_sets.app_metric_set(&labels);

    Ok(RequestRecord {
        id: record.id.clone(),
        transport_id: parent_id.to_string(),
        start_time: record.start_time.unwrap_or(parent.start_time),
        end_time: record.end_time.unwrap_or(parent.end_time),
        routing_key: parent.routing_key.clone(),
        protocol: parent.protocol.clone(),
        connector: parent.connector.clone(),
        listener: parent.listener.clone(),
        source: parent.source.clone(),
        source_site: parent.source_site.clone(),
        dest: parent.dest.clone(),
        dest_site: parent.dest_site.clone(),
        source_group: parent.source_group.clone(),
        dest_group: parent.dest_group.clone(),
        metrics,
    })
}
