//! Topology graph interface (§6).
//!
//! The reconcilers never own or mutate topology; they issue read-through identity lookups against
//! whatever graph the embedding system maintains (built from router-reported listener/connector/site
//! records, out of scope here). [`TopologyGraph`] is the seam: a small trait rather than a
//! concrete struct, so the graph can be backed by anything from a `petgraph` graph to a handful of
//! `HashMap`s without this crate caring.

use std::sync::Arc;

/// A node's kind in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Listener,
    Connector,
    Router,
    Site,
    Process,
}

/// A single topology node.
///
/// Nodes are cheap, owned snapshots (an id plus enough structure to walk up or across the graph),
/// never borrowed handles into the graph's internal storage — the graph is queried by identity on
/// every lookup, matching the "weak reference" design note: no component outside the graph
/// implementation holds a long-lived pointer into it.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: Arc<str>,
    pub kind: NodeKind,
    parent: Option<Arc<str>>,
    process: Option<Arc<str>>,
    target: Option<Arc<str>>,
}

impl Node {
    pub fn new(id: impl Into<Arc<str>>, kind: NodeKind) -> Self {
        Node {
            id: id.into(),
            kind,
            parent: None,
            process: None,
            target: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<Arc<str>>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_process(mut self, process: impl Into<Arc<str>>) -> Self {
        self.process = Some(process.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<Arc<str>>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Topology lookups consumed by the reconcilers.
///
/// All lookups return `None` for a missing link; implementers should never invent a sentinel "empty
/// id" node (that is an artifact of languages without option types, not something to translate).
pub trait TopologyGraph: Send + Sync {
    fn listener(&self, id: &str) -> Option<Node>;
    fn connector(&self, id: &str) -> Option<Node>;
    fn connector_target(&self, site_id: &str, host: &str) -> Option<Node>;

    /// The node's parent in the topology (listener/connector -> router -> site).
    fn parent(&self, node: &Node) -> Option<Node>;

    /// The process attached to a connector-target node.
    fn process_of(&self, node: &Node) -> Option<Node> {
        node.process.clone().and_then(|id| {
            Some(Node::new(id, NodeKind::Process))
        })
    }

    /// The process a connector dials, i.e. `connector.Target()`.
    fn target_of(&self, node: &Node) -> Option<Node> {
        node.target.clone().map(|id| Node::new(id, NodeKind::Process))
    }
}

/// An in-memory topology graph suitable for tests and the demo binary.
///
/// Production deployments back [`TopologyGraph`] with whatever structure the embedding system
/// already maintains; this implementation exists purely so the reconcilers have something concrete
/// to run against without a real router fleet.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    nodes: std::collections::HashMap<Arc<str>, Node>,
    /// (site_id, host) -> process-node id, modeling `ConnectorTarget`.
    targets: std::collections::HashMap<(String, String), Arc<str>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) -> &mut Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn insert_target(&mut self, site_id: impl Into<String>, host: impl Into<String>, process_id: impl Into<Arc<str>>) -> &mut Self {
        self.targets.insert((site_id.into(), host.into()), process_id.into());
        self
    }
}

impl TopologyGraph for InMemoryGraph {
    fn listener(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).cloned()
    }

    fn connector(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).cloned()
    }

    fn connector_target(&self, site_id: &str, host: &str) -> Option<Node> {
        self.targets
            .get(&(site_id.to_string(), host.to_string()))
            .and_then(|id| self.nodes.get(id))
            .cloned()
    }

    fn parent(&self, node: &Node) -> Option<Node> {
        node.parent.as_ref().and_then(|id| self.nodes.get(id)).cloned()
    }

    /// `connector_target` already resolves straight to the process node itself rather than an
    /// intermediate connector-target link, so the process is the node, not `node.process`.
    fn process_of(&self, node: &Node) -> Option<Node> {
        Some(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_listener_to_site() {
        let mut g = InMemoryGraph::new();
        g.insert(Node::new("site1", NodeKind::Site));
        g.insert(Node::new("router1", NodeKind::Router).with_parent("site1"));
        g.insert(Node::new("listener1", NodeKind::Listener).with_parent("router1"));

        let listener = g.listener("listener1").unwrap();
        let router = g.parent(&listener).unwrap();
        assert_eq!(router.id(), "router1");
        let site = g.parent(&router).unwrap();
        assert_eq!(site.id(), "site1");
    }

    #[test]
    fn missing_link_is_none() {
        let g = InMemoryGraph::new();
        assert!(g.listener("nope").is_none());
        assert!(g.connector_target("site1", "10.0.0.1").is_none());
    }

    #[test]
    fn connector_target_resolves_process() {
        let mut g = InMemoryGraph::new();
        g.insert(Node::new("proc1", NodeKind::Process));
        g.insert_target("site1", "10.0.0.1", "proc1");
        let target = g.connector_target("site1", "10.0.0.1").unwrap();
        assert_eq!(target.id(), "proc1");
    }
}
