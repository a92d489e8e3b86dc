#![allow(clippy::needless_doctest_main)]

//! Reconciles raw transport- and application-layer biflow records against a topology graph into
//! enriched connection, request, process-pair, and flow-source records.
//!
//! A [`manager::ConnectionManager`] is built from an [`store::EventSource`] (the raw record feed)
//! and a [`graph::TopologyGraph`] (the topology this crate never constructs itself). It ingests
//! records into two short-lived flow tables, reconciles them against the graph on dedicated
//! threads with exponential backoff, and writes enriched records into a shared [`store::RecordStore`]
//! alongside process-wide [`metrics::Metrics`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flow_recon::config::default_config;
//! use flow_recon::graph::InMemoryGraph;
//! use flow_recon::manager::ConnectionManager;
//! use flow_recon::metrics::{Metrics, MetricSetCache};
//! use flow_recon::store::InMemoryEventSource;
//! use prometheus_client::registry::Registry;
//!
//! let event_source = Arc::new(InMemoryEventSource::new("demo"));
//! let graph = Arc::new(InMemoryGraph::new());
//! let mut registry = Registry::default();
//! let metric_sets = Arc::new(MetricSetCache::new(Metrics::new(&mut registry, "flow_recon")));
//!
//! let manager = ConnectionManager::new(event_source, graph, metric_sets, default_config());
//! manager.clone().run();
//! manager.stop();
//! ```

pub mod attributes;
pub mod backoff;
pub mod config;
pub mod graph;
pub mod http;
pub mod identity;
pub mod lru;
pub mod manager;
pub mod metrics;
pub mod records;
pub mod store;

pub use config::{default_config, load_config, RuntimeConfig};
pub use graph::TopologyGraph;
pub use manager::ConnectionManager;
pub use store::EventSource;
