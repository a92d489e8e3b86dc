//! The enriched record store (§4.6) and the event-source ingestion seam (§6).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::records::Record;

/// Upstream event callbacks a [`crate::manager::ConnectionManager`] installs on its event source.
///
/// Mirrors the source's store-interface Add/Update/Delete trio: the event source owns delivery
/// ordering and retry, this crate only reacts. Handlers run on whatever thread the event source
/// delivers from; they must not block for long, since they run under this crate's own locks.
pub trait EventSource: Send + Sync {
    fn on_add(&self, handler: Box<dyn Fn(Record) + Send + Sync>);
    fn on_change(&self, handler: Box<dyn Fn(Record) + Send + Sync>);
    fn on_delete(&self, handler: Box<dyn Fn(&str) + Send + Sync>);

    /// A stable identifier for this event source, used to label the pending-flow gauges so
    /// multiple sources sharing one process-wide registry don't collide.
    fn id(&self) -> &str;
}

/// The enriched record store: holds both raw topology attribute records (connector/process/site/
/// router/process-group) and this crate's own derived records (connection/request/procpair/
/// flowsource), indexed by id.
///
/// A single table serves both purposes because reconciliation reads topology attribute records and
/// writes derived records into the same space other components read from — the attribute cache
/// (§4.6) and the process-pair table both consult it.
#[derive(Default)]
pub struct RecordStore {
    records: Mutex<HashMap<String, Record>>,
}

impl RecordStore {
    pub fn new() -> Self {
        RecordStore {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, record: Record) {
        let id = record.identity().to_string();
        self.records.lock().unwrap().insert(id, record);
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> Option<Record> {
        self.records.lock().unwrap().remove(id)
    }

    /// Returns every record for which `matches` holds, scanning the full table under the lock.
    ///
    /// There is no secondary index per query shape; callers that need this often (e.g. the
    /// housekeeper's periodic scans) are expected to call it on their own cadence, not per record.
    pub fn index(&self, matches: impl Fn(&Record) -> bool) -> Vec<Record> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| matches(r))
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<Record> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type AddHandlers = Mutex<Vec<Box<dyn Fn(Record) + Send + Sync>>>;
type DeleteHandlers = Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>;

/// An in-memory [`EventSource`] for tests and the demo binary.
///
/// Production deployments back `EventSource` with whatever router-facing transport the embedding
/// system already has; this implementation exists so the manager has something to ingest from
/// without a real router connection.
pub struct InMemoryEventSource {
    id: String,
    on_add: Arc<AddHandlers>,
    on_change: Arc<AddHandlers>,
    on_delete: Arc<DeleteHandlers>,
}

impl InMemoryEventSource {
    pub fn new(id: impl Into<String>) -> Self {
        InMemoryEventSource {
            id: id.into(),
            on_add: Arc::new(Mutex::new(Vec::new())),
            on_change: Arc::new(Mutex::new(Vec::new())),
            on_delete: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn emit_add(&self, record: Record) {
        for handler in self.on_add.lock().unwrap().iter() {
            handler(record.clone());
        }
    }

    pub fn emit_change(&self, record: Record) {
        for handler in self.on_change.lock().unwrap().iter() {
            handler(record.clone());
        }
    }

    pub fn emit_delete(&self, id: &str) {
        for handler in self.on_delete.lock().unwrap().iter() {
            handler(id);
        }
    }
}

impl EventSource for InMemoryEventSource {
    fn on_add(&self, handler: Box<dyn Fn(Record) + Send + Sync>) {
        self.on_add.lock().unwrap().push(handler);
    }

    fn on_change(&self, handler: Box<dyn Fn(Record) + Send + Sync>) {
        self.on_change.lock().unwrap().push(handler);
    }

    fn on_delete(&self, handler: Box<dyn Fn(&str) + Send + Sync>) {
        self.on_delete.lock().unwrap().push(handler);
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SiteRecord;

    #[test]
    fn add_then_get_round_trips() {
        let store = RecordStore::new();
        store.add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: Some("site-1".into()),
        }));
        let got = store.get("site1").unwrap();
        assert_eq!(got.identity(), "site1");
    }

    #[test]
    fn delete_removes() {
        let store = RecordStore::new();
        store.add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: None,
        }));
        assert!(store.delete("site1").is_some());
        assert!(store.get("site1").is_none());
    }

    #[test]
    fn index_filters_by_predicate() {
        let store = RecordStore::new();
        store.add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: None,
        }));
        store.add(Record::Site(SiteRecord {
            id: "site2".into(),
            name: None,
        }));
        let sites = store.index(|r| matches!(r, Record::Site(_)));
        assert_eq!(sites.len(), 2);
    }

    #[test]
    fn event_source_dispatches_to_registered_handlers() {
        let source = InMemoryEventSource::new("src1");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        source.on_add(Box::new(move |r| seen_clone.lock().unwrap().push(r.identity().to_string())));
        source.emit_add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: None,
        }));
        assert_eq!(seen.lock().unwrap().as_slice(), &["site1".to_string()]);
    }
}
