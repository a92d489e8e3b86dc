//! Wires a [`ConnectionManager`] against a toy topology and an in-memory event source, feeding it
//! one transport flow and one application flow, then prints the resulting records.

use std::sync::Arc;
use std::time::Duration;

use flow_recon::config::default_config;
use flow_recon::graph::{InMemoryGraph, Node, NodeKind};
use flow_recon::manager::ConnectionManager;
use flow_recon::metrics::{Metrics, MetricSetCache};
use flow_recon::records::{
    AppBiflowRecord, ConnectorRecord, ProcessGroupRecord, ProcessRecord, Record, RouterRecord,
    SiteRecord, TransportBiflowRecord,
};
use flow_recon::store::InMemoryEventSource;
use prometheus_client::registry::Registry;

fn main() {
    env_logger::init();

    let mut graph = InMemoryGraph::new();
    graph.insert(Node::new("site1", NodeKind::Site));
    graph.insert(Node::new("router1", NodeKind::Router).with_parent("site1"));
    graph.insert(Node::new("listener1", NodeKind::Listener).with_parent("router1"));
    graph.insert(
        Node::new("connector1", NodeKind::Connector)
            .with_parent("router1")
            .with_target("proc-dest"),
    );
    graph.insert(Node::new("proc-source", NodeKind::Process));
    graph.insert(Node::new("proc-dest", NodeKind::Process));
    graph.insert_target("site1", "10.0.0.1", "proc-source");

    let mut registry = Registry::default();
    let metric_sets = Arc::new(MetricSetCache::new(Metrics::new(&mut registry, "flow_recon_demo")));
    let event_source = Arc::new(InMemoryEventSource::new("demo"));

    let manager = ConnectionManager::new(
        event_source.clone(),
        Arc::new(graph),
        metric_sets,
        default_config(),
    );
    manager.clone().run();

    event_source.emit_add(Record::Site(SiteRecord {
        id: "site1".into(),
        name: Some("site-1".into()),
    }));
    event_source.emit_add(Record::Router(RouterRecord {
        id: "router1".into(),
        name: Some("router-1".into()),
    }));
    event_source.emit_add(Record::ProcessGroup(ProcessGroupRecord {
        id: "group1".into(),
        name: "tier".into(),
    }));
    event_source.emit_add(Record::Process(ProcessRecord {
        id: "proc-source".into(),
        name: Some("client".into()),
        parent: Some("site1".into()),
        group: Some("tier".into()),
    }));
    event_source.emit_add(Record::Process(ProcessRecord {
        id: "proc-dest".into(),
        name: Some("backend".into()),
        parent: Some("site1".into()),
        group: Some("tier".into()),
    }));
    event_source.emit_add(Record::Connector(ConnectorRecord {
        id: "connector1".into(),
        address: Some("backend-svc".into()),
        protocol: Some("tcp".into()),
        dest_host: Some("10.0.0.2".into()),
        dest_port: Some("8080".into()),
    }));
    event_source.emit_add(Record::Transport(TransportBiflowRecord {
        id: "flow1".into(),
        parent: Some("listener1".into()),
        connector_id: Some("connector1".into()),
        source_host: Some("10.0.0.1".into()),
        start_time: Some(chrono::Utc::now()),
        end_time: None,
        octets: Some(4096),
        octets_reverse: Some(1024),
        latency: Some(1200),
        latency_reverse: Some(900),
    }));
    event_source.emit_add(Record::App(AppBiflowRecord {
        id: "req1".into(),
        parent: Some("flow1".into()),
        start_time: Some(chrono::Utc::now()),
        end_time: Some(chrono::Utc::now()),
        protocol: Some("http".into()),
        method: Some("GET".into()),
        result: Some("200".into()),
    }));

    // Give the reconciler loops a few passes; the app flow depends on the transport flow
    // reconciling first.
    std::thread::sleep(Duration::from_millis(200));

    if let Some(record) = manager.store().get("flow1") {
        log::info!("connection: {:#?}", record.as_connection());
    }
    if let Some(record) = manager.store().get("req1") {
        log::info!("request identity: {}", record.identity());
    }

    manager.stop();
}
