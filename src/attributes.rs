//! Attribute cache (§4.6): memoized topology-attribute lookups.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::records::{NamedReference, ProcessRecord, Record};
use crate::store::RecordStore;

/// A process's resolved attributes: its own name, its site, and its group, each already turned
/// into a [`NamedReference`] a reconciler can embed directly into an output record.
#[derive(Debug, Clone)]
pub struct ProcessAttrs {
    pub process: NamedReference,
    pub site: NamedReference,
    pub group: NamedReference,
}

/// Memoizes connector/process/router attribute resolution.
///
/// Resolving a process walks several records (process -> parent site, process -> group name by
/// lookup); the cache exists so the hot ingestion path does that walk once per identity rather than
/// once per flow. Invalidated wholesale by the housekeeper's cache-purge tick rather than per-entry:
/// topology changes are rare, and co-ordinated invalidation is simpler to reason about than tracking
/// dependency edges between cached attributes.
#[derive(Default)]
pub struct AttributeCache {
    connector: Mutex<HashMap<String, NamedReference>>,
    process: Mutex<HashMap<String, ProcessAttrs>>,
    router: Mutex<HashMap<String, NamedReference>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector_attrs(&self, store: &RecordStore, id: &str) -> Option<NamedReference> {
        if let Some(hit) = self.connector.lock().unwrap().get(id) {
            return Some(hit.clone());
        }
        let record = store.get(id)?;
        let connector = record.as_connector()?;
        let attrs = NamedReference::with_id(connector.id.clone());
        self.connector.lock().unwrap().insert(id.to_string(), attrs.clone());
        Some(attrs)
    }

    pub fn router_attrs(&self, store: &RecordStore, id: &str) -> Option<NamedReference> {
        if let Some(hit) = self.router.lock().unwrap().get(id) {
            return Some(hit.clone());
        }
        let record = store.get(id)?;
        let router = record.as_router()?;
        let attrs = NamedReference {
            id: router.id.clone(),
            name: router.name.clone().unwrap_or_default(),
        };
        self.router.lock().unwrap().insert(id.to_string(), attrs.clone());
        Some(attrs)
    }

    /// Resolves a process's name, site, and group.
    ///
    /// A process missing a parent site or a group resolves to `None` rather than a partially filled
    /// [`ProcessAttrs`]: attributes are all-or-nothing, matching the reconcilers' "missing enrichment
    /// data means the flow stays pending" rule rather than emitting a record with blank fields.
    pub fn process_attrs(&self, store: &RecordStore, id: &str) -> Option<ProcessAttrs> {
        if let Some(hit) = self.process.lock().unwrap().get(id) {
            return Some(hit.clone());
        }
        let record = store.get(id)?;
        let process = record.as_process()?;
        let attrs = self.resolve_process(store, process)?;
        self.process.lock().unwrap().insert(id.to_string(), attrs.clone());
        Some(attrs)
    }

    fn resolve_process(&self, store: &RecordStore, process: &ProcessRecord) -> Option<ProcessAttrs> {
        let site_id = process.parent.as_ref()?;
        let site_record = store.get(site_id)?;
        let site = site_record.as_site()?;

        let group_name = process.group.as_ref()?;
        let groups = store.index(|r| matches!(r, Record::ProcessGroup(g) if &g.name == group_name));
        let group_id = groups
            .first()
            .map(|r| r.identity().to_string())
            .unwrap_or_else(|| group_name.clone());

        Some(ProcessAttrs {
            process: NamedReference {
                id: process.id.clone(),
                name: process.name.clone().unwrap_or_default(),
            },
            site: NamedReference {
                id: site.id.clone(),
                name: site.name.clone().unwrap_or_default(),
            },
            group: NamedReference {
                id: group_id,
                name: group_name.clone(),
            },
        })
    }

    /// Drops every cached entry.
    pub fn invalidate(&self) {
        self.connector.lock().unwrap().clear();
        self.process.lock().unwrap().clear();
        self.router.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ProcessGroupRecord, SiteRecord};

    fn populated_store() -> RecordStore {
        let store = RecordStore::new();
        store.add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: Some("site-1".into()),
        }));
        store.add(Record::ProcessGroup(ProcessGroupRecord {
            id: "group1".into(),
            name: "web-tier".into(),
        }));
        store.add(Record::Process(ProcessRecord {
            id: "proc1".into(),
            name: Some("proc-1".into()),
            parent: Some("site1".into()),
            group: Some("web-tier".into()),
        }));
        store
    }

    #[test]
    fn resolves_full_process_attrs() {
        let store = populated_store();
        let cache = AttributeCache::new();
        let attrs = cache.process_attrs(&store, "proc1").unwrap();
        assert_eq!(attrs.process.name, "proc-1");
        assert_eq!(attrs.site.id, "site1");
        assert_eq!(attrs.group.id, "group1");
        assert_eq!(attrs.group.name, "web-tier");
    }

    #[test]
    fn missing_group_record_falls_back_to_group_name_as_id() {
        let store = RecordStore::new();
        store.add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: None,
        }));
        store.add(Record::Process(ProcessRecord {
            id: "proc1".into(),
            name: None,
            parent: Some("site1".into()),
            group: Some("orphan-group".into()),
        }));
        let cache = AttributeCache::new();
        let attrs = cache.process_attrs(&store, "proc1").unwrap();
        assert_eq!(attrs.group.id, "orphan-group");
    }

    #[test]
    fn process_without_group_is_unresolved() {
        let store = RecordStore::new();
        store.add(Record::Site(SiteRecord {
            id: "site1".into(),
            name: None,
        }));
        store.add(Record::Process(ProcessRecord {
            id: "proc1".into(),
            name: None,
            parent: Some("site1".into()),
            group: None,
        }));
        let cache = AttributeCache::new();
        assert!(cache.process_attrs(&store, "proc1").is_none());
    }

    #[test]
    fn process_without_site_is_unresolved() {
        let store = RecordStore::new();
        store.add(Record::Process(ProcessRecord {
            id: "proc1".into(),
            name: None,
            parent: None,
            group: Some("web-tier".into()),
        }));
        let cache = AttributeCache::new();
        assert!(cache.process_attrs(&store, "proc1").is_none());
    }

    #[test]
    fn repeated_lookup_is_served_from_cache() {
        let store = populated_store();
        let cache = AttributeCache::new();
        let first = cache.process_attrs(&store, "proc1").unwrap();
        store.delete("site1");
        let second = cache.process_attrs(&store, "proc1").unwrap();
        assert_eq!(first.site.id, second.site.id);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let store = populated_store();
        let cache = AttributeCache::new();
        assert!(cache.process_attrs(&store, "proc1").is_some());
        store.delete("site1");
        cache.invalidate();
        assert!(cache.process_attrs(&store, "proc1").is_none());
    }
}
