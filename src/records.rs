//! Raw telemetry records and the derived (enriched) records this crate produces.
//!
//! Raw records are opaque payloads handed in by the event source; this crate only reads the fields
//! named in §3/§4 of the design doc and never decodes wire bytes itself (out of scope). Derived
//! records are immutable once constructed except for their bound metric handles, which are set
//! exactly once by a reconciler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::{AppMetricSet, TransportMetricSet};

/// A transport-layer biflow record as emitted by a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportBiflowRecord {
    pub id: String,
    /// Listener id this biflow terminated on.
    pub parent: Option<String>,
    pub connector_id: Option<String>,
    pub source_host: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Octets observed from originator to responder.
    pub octets: Option<u64>,
    /// Octets observed from responder to originator.
    pub octets_reverse: Option<u64>,
    /// Microseconds, originator direction.
    pub latency: Option<i64>,
    /// Microseconds, responder direction.
    pub latency_reverse: Option<i64>,
}

/// An application-layer biflow record (e.g. one HTTP request/response pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppBiflowRecord {
    pub id: String,
    /// Id of the owning transport biflow.
    pub parent: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub protocol: Option<String>,
    pub method: Option<String>,
    /// Response code as a string, e.g. `"204"`.
    pub result: Option<String>,
}

/// A connector topology record, as reported by a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: String,
    pub address: Option<String>,
    pub protocol: Option<String>,
    pub dest_host: Option<String>,
    pub dest_port: Option<String>,
}

/// A process topology record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: String,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub group: Option<String>,
}

/// A site topology record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: String,
    pub name: Option<String>,
}

/// A router topology record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRecord {
    pub id: String,
    pub name: Option<String>,
}

/// A process-group topology record, looked up by name rather than id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessGroupRecord {
    pub id: String,
    pub name: String,
}

/// Any record this crate exchanges with the flow store or record store.
///
/// Standing in for Go's dynamic-dispatch-by-type-metadata switch: the event source and record store
/// tag every record with one of these variants, and ingestion/attribute lookups match on the
/// variant they expect, ignoring the rest.
#[derive(Debug, Clone, Serialize)]
pub enum Record {
    Transport(TransportBiflowRecord),
    App(AppBiflowRecord),
    Connector(ConnectorRecord),
    Process(ProcessRecord),
    Site(SiteRecord),
    Router(RouterRecord),
    ProcessGroup(ProcessGroupRecord),
    Connection(ConnectionRecord),
    Request(RequestRecord),
    ProcPair(ProcPairRecord),
    FlowSource(FlowSourceRecord),
}

impl Record {
    pub fn identity(&self) -> &str {
        match self {
            Record::Transport(r) => &r.id,
            Record::App(r) => &r.id,
            Record::Connector(r) => &r.id,
            Record::Process(r) => &r.id,
            Record::Site(r) => &r.id,
            Record::Router(r) => &r.id,
            Record::ProcessGroup(r) => &r.id,
            Record::Connection(r) => &r.id,
            Record::Request(r) => &r.id,
            Record::ProcPair(r) => &r.id,
            Record::FlowSource(r) => &r.id,
        }
    }

    pub fn as_transport(&self) -> Option<&TransportBiflowRecord> {
        match self {
            Record::Transport(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_app(&self) -> Option<&AppBiflowRecord> {
        match self {
            Record::App(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_connector(&self) -> Option<&ConnectorRecord> {
        match self {
            Record::Connector(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_process(&self) -> Option<&ProcessRecord> {
        match self {
            Record::Process(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_site(&self) -> Option<&SiteRecord> {
        match self {
            Record::Site(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_router(&self) -> Option<&RouterRecord> {
        match self {
            Record::Router(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_process_group(&self) -> Option<&ProcessGroupRecord> {
        match self {
            Record::ProcessGroup(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_connection(&self) -> Option<&ConnectionRecord> {
        match self {
            Record::Connection(r) => Some(r),
            _ => None,
        }
    }
}

/// A named reference to another topology entity: an id plus a human-readable name, the latter
/// absent for references that only ever carry an id (connector, listener).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NamedReference {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl NamedReference {
    pub fn with_id(id: impl Into<String>) -> Self {
        NamedReference {
            id: id.into(),
            name: String::new(),
        }
    }
}

/// A reconciled connection: the output of a successful transport reconciliation.
///
/// Immutable after construction other than its bound `metrics`, which a reconciler sets exactly
/// once.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub routing_key: String,
    pub protocol: String,
    pub connector_host: String,
    pub connector_port: String,
    pub source: NamedReference,
    pub source_site: NamedReference,
    pub source_router: NamedReference,
    pub dest: NamedReference,
    pub dest_site: NamedReference,
    pub dest_router: NamedReference,
    pub connector: NamedReference,
    pub listener: NamedReference,
    pub source_group: NamedReference,
    pub dest_group: NamedReference,

    #[serde(skip)]
    pub metrics: Arc<TransportMetricSet>,
}

/// A reconciled request: the output of a successful application reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub id: String,
    pub transport_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub routing_key: String,
    pub protocol: String,
    pub connector: NamedReference,
    pub listener: NamedReference,
    pub source: NamedReference,
    pub source_site: NamedReference,
    pub dest: NamedReference,
    pub dest_site: NamedReference,
    pub source_group: NamedReference,
    pub dest_group: NamedReference,

    #[serde(skip)]
    pub metrics: Arc<AppMetricSet>,
}

/// A deduplicated (source process, dest process, protocol) observation.
#[derive(Debug, Clone, Serialize)]
pub struct ProcPairRecord {
    pub id: String,
    pub source: String,
    pub dest: String,
    pub protocol: String,
    pub start: DateTime<Utc>,
}

/// Marks that traffic was observed from a (site, host) pair before its process was known.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSourceRecord {
    pub id: String,
    pub site: String,
    pub host: String,
    pub start: DateTime<Utc>,
}

/// The (source, dest, protocol) key used to dedupe process-pair records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub source: String,
    pub dest: String,
    pub protocol: String,
}
