//! The connection manager: wires ingestion, reconciliation, and housekeeping around one event
//! source (§4, §5).
//!
//! Lock-acquisition order, should more than one ever need to be held at once: flow-table lock (the
//! [`crate::lru::KeyedLru`] internal mutex) before the attribute-cache lock, before the
//! metric-set-cache lock. In practice each of [`ConnectionManager`]'s own locks is acquired, used,
//! and released before the next is touched rather than nested, but the order above is the one to
//! preserve if that ever changes.

mod housekeeper;
mod ingest;
mod reconcile;
mod reconciler_loop;
mod state;

pub use reconcile::ReconcileReason;
pub use state::{AppFlowState, TransportFlowState};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};

use crate::attributes::AttributeCache;
use crate::config::RuntimeConfig;
use crate::graph::TopologyGraph;
use crate::identity::StableIdProvider;
use crate::lru::KeyedLru;
use crate::metrics::{LabelSet, MetricSetCache};
use crate::records::{ConnectionRecord, Record};
use crate::store::{EventSource, RecordStore};

use self::reconcile::{ReconcileReason as Reason, APP_REASONS, TRANSPORT_REASONS};
use self::reconciler_loop::PassOutcome;

/// Ties together the flow tables, topology graph, record store, attribute cache, and metric-set
/// cache for one event source, and owns the threads that reconcile and clean up after them.
///
/// Constructed once per event source; the metrics [`Registry`](prometheus_client::registry::Registry)
/// behind `metric_sets` is the one piece of state this crate expects to be process-wide rather than
/// per-manager (§9: the single sanctioned exception to "no global mutable state").
pub struct ConnectionManager {
    event_source_id: String,
    graph: Arc<dyn TopologyGraph>,
    store: Arc<RecordStore>,
    attrs: Arc<AttributeCache>,
    metric_sets: Arc<MetricSetCache>,
    transport_table: Arc<KeyedLru<String, TransportFlowState>>,
    app_table: Arc<KeyedLru<String, AppFlowState>>,
    idp: StableIdProvider,
    config: RuntimeConfig,
    cancel_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Builds a manager and installs its ingestion handlers on `event_source`. Does not start any
    /// background threads; call [`ConnectionManager::run`] for that.
    pub fn new(
        event_source: Arc<dyn EventSource>,
        graph: Arc<dyn TopologyGraph>,
        metric_sets: Arc<MetricSetCache>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(ConnectionManager {
            event_source_id: event_source.id().to_string(),
            graph,
            store: Arc::new(RecordStore::new()),
            attrs: Arc::new(AttributeCache::new()),
            metric_sets,
            transport_table: Arc::new(KeyedLru::new()),
            app_table: Arc::new(KeyedLru::new()),
            idp: StableIdProvider::new(),
            config,
            cancel_tx: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        });

        Self::install_handlers(&manager, event_source.as_ref());
        manager
    }

    fn install_handlers(manager: &Arc<Self>, event_source: &dyn EventSource) {
        let add_transport = manager.clone();
        let add_app = manager.clone();
        let add_topology = manager.clone();
        let change_transport = manager.clone();
        let change_app = manager.clone();
        let change_topology = manager.clone();
        let delete = manager.clone();

        event_source.on_add(Box::new(move |record| match record {
            Record::Transport(r) => ingest::on_transport_upsert(&add_transport.transport_table, r),
            Record::App(r) => ingest::on_app_upsert(&add_app.app_table, r),
            other => ingest::on_topology_upsert(&add_topology.store, &add_topology.attrs, other),
        }));

        event_source.on_change(Box::new(move |record| match record {
            Record::Transport(r) => ingest::on_transport_upsert(&change_transport.transport_table, r),
            Record::App(r) => ingest::on_app_upsert(&change_app.app_table, r),
            other => ingest::on_topology_upsert(&change_topology.store, &change_topology.attrs, other),
        }));

        event_source.on_delete(Box::new(move |id| {
            ingest::on_transport_delete(&delete.transport_table, id);
            ingest::on_app_delete(&delete.app_table, id);
            ingest::on_topology_delete(&delete.store, &delete.attrs, id);
        }));
    }

    /// Starts the housekeeper and both reconciler loops on dedicated threads. Idempotent only in
    /// the sense that calling it twice spawns a second set of threads; callers should call it once.
    ///
    /// Takes `Arc<Self>` by value so each spawned thread can own a clone; call it as
    /// `manager.clone().run()` if the caller still needs `manager` afterward (e.g. to call
    /// [`ConnectionManager::stop`]).
    pub fn run(self: Arc<Self>) {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        *self.cancel_tx.lock().unwrap() = Some(cancel_tx);

        let mut threads = Vec::new();
        threads.push(Self::spawn_housekeeper(&self, cancel_rx.clone()));
        threads.push(Self::spawn_transport_loop(&self, cancel_rx.clone()));
        threads.push(Self::spawn_app_loop(&self, cancel_rx));
        *self.threads.lock().unwrap() = threads;
    }

    /// Signals every background thread to stop and waits for them to exit.
    pub fn stop(&self) {
        self.cancel_tx.lock().unwrap().take();
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }

    fn spawn_housekeeper(manager: &Arc<Self>, cancel_rx: Receiver<()>) -> JoinHandle<()> {
        let manager = manager.clone();
        std::thread::spawn(move || {
            housekeeper::run(
                &cancel_rx,
                &manager.config.housekeeper,
                &manager.transport_table,
                &manager.app_table,
                &manager.store,
                &manager.attrs,
                &manager.idp,
                manager.graph.as_ref(),
                manager.config.ttl(),
            );
        })
    }

    fn spawn_transport_loop(manager: &Arc<Self>, cancel_rx: Receiver<()>) -> JoinHandle<()> {
        let manager = manager.clone();
        std::thread::spawn(move || {
            reconciler_loop::run(&cancel_rx, || manager.reconcile_transport_pass());
        })
    }

    fn spawn_app_loop(manager: &Arc<Self>, cancel_rx: Receiver<()>) -> JoinHandle<()> {
        let manager = manager.clone();
        std::thread::spawn(move || {
            reconciler_loop::run(&cancel_rx, || manager.reconcile_app_pass());
        })
    }

    /// Reconciles every transport flow whose metrics are not yet bound, retrying every pass
    /// regardless of `dirty` (§5: the metric-set pointer is set exactly once and read thereafter, so
    /// a still-unbound flow is always worth retrying; `dirty` is advisory only, left for
    /// [`ingest::on_transport_upsert`] to branch on).
    ///
    /// On success, binds the flow's `metric_set`, stores the enriched `ConnectionRecord`, and
    /// replays the raw record back through the ingestion handler (§4.8 step 5) so whatever was
    /// already observed on the record before reconciliation — opened, byte totals, latency, a
    /// completed end-time — gets emitted now that the metric-set exists.
    fn reconcile_transport_pass(&self) -> PassOutcome {
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut pending: HashMap<Reason, usize> = HashMap::new();

        for mut flow in self.transport_table.items() {
            flow.dirty = false;
            if flow.metric_set.is_some() {
                self.transport_table.push(flow.record.id.clone(), flow);
                continue;
            }
            attempted += 1;
            let id = flow.record.id.clone();

            match reconcile::reconcile_transport(self.graph.as_ref(), &self.store, &self.attrs, &flow.record) {
                Ok(fields) => {
                    let labels = LabelSet {
                        source_process: fields.source.id.clone(),
                        dest_process: fields.dest.id.clone(),
                        source_site_id: fields.source_site.id.clone(),
                        source_site_name: fields.source_site.name.clone(),
                        dest_site_id: fields.dest_site.id.clone(),
                        dest_site_name: fields.dest_site.name.clone(),
                        routing_key: fields.routing_key.clone(),
                        protocol: fields.protocol.clone(),
                    };
                    let metrics = self.metric_sets.transport_metric_set(&labels);

                    self.store.add(Record::Connection(ConnectionRecord {
                        id: id.clone(),
                        start_time: flow.record.start_time.unwrap_or_else(Utc::now),
                        end_time: flow.record.end_time.unwrap_or_else(Utc::now),
                        routing_key: fields.routing_key,
                        protocol: fields.protocol,
                        connector_host: fields.connector_host,
                        connector_port: fields.connector_port,
                        source: fields.source,
                        source_site: fields.source_site,
                        source_router: fields.source_router,
                        dest: fields.dest,
                        dest_site: fields.dest_site,
                        dest_router: fields.dest_router,
                        connector: fields.connector,
                        listener: fields.listener,
                        source_group: fields.source_group,
                        dest_group: fields.dest_group,
                        metrics: metrics.clone(),
                    }));

                    flow.metric_set = Some(metrics);
                    let record = flow.record.clone();
                    self.transport_table.push(id, flow);
                    ingest::on_transport_upsert(&self.transport_table, record);
                    succeeded += 1;
                }
                Err(reason) => {
                    *pending.entry(reason).or_insert(0) += 1;
                    self.transport_table.push(id, flow);
                }
            }
        }

        self.publish_pending("transport", TRANSPORT_REASONS, &pending);
        PassOutcome { attempted, succeeded }
    }

    /// Mirrors [`Self::reconcile_transport_pass`] for application flows.
    fn reconcile_app_pass(&self) -> PassOutcome {
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut pending: HashMap<Reason, usize> = HashMap::new();

        for mut flow in self.app_table.items() {
            flow.dirty = false;
            if flow.metric_set.is_some() {
                self.app_table.push(flow.record.id.clone(), flow);
                continue;
            }
            attempted += 1;
            let id = flow.record.id.clone();

            match reconcile::reconcile_app(&self.transport_table, &self.store, &self.metric_sets, &flow.record) {
                Ok(request) => {
                    let metrics = request.metrics.clone();
                    self.store.add(Record::Request(request));

                    flow.metric_set = Some(metrics);
                    let record = flow.record.clone();
                    self.app_table.push(id, flow);
                    ingest::on_app_upsert(&self.app_table, record);
                    succeeded += 1;
                }
                Err(reason) => {
                    *pending.entry(reason).or_insert(0) += 1;
                    self.app_table.push(id, flow);
                }
            }
        }

        self.publish_pending("app", APP_REASONS, &pending);
        PassOutcome { attempted, succeeded }
    }

    /// Publishes the absolute pending-flow count for every reason in `reasons`, including an
    /// explicit zero for reasons nothing was pending on this pass (§4.8 step 4): the gauge always
    /// reflects this pass's snapshot, never an accumulation across passes.
    fn publish_pending(&self, record_type: &'static str, reasons: &[Reason], pending: &HashMap<Reason, usize>) {
        for reason in reasons {
            let count = pending.get(reason).copied().unwrap_or(0);
            self.metric_sets
                .pending_gauge(&self.event_source_id, record_type, reason.as_label())
                .set(count as i64);
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }
}
