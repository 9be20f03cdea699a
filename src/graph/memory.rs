//! Embedded in-memory graph engine
//!
//! Stand-in for an external graph database running in the same process.
//! Committed state lives in hash maps behind one RwLock; writes stage
//! inside a transaction and apply atomically on commit. Node ids come from
//! an atomic counter and are never reused, so cache entries stay valid for
//! the lifetime of the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{GraphStore, GraphTx, Label, NodeId, RelKind, StoreStats};
use crate::error::Result;

#[derive(Debug, Clone)]
struct NodeData {
    label: Label,
    properties: HashMap<String, String>,
}

/// Committed graph state.
#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, NodeData>,
    /// (label, property, value) -> first node committed with that value.
    /// Later duplicates stay in `nodes` but do not displace the index entry.
    index: HashMap<(Label, String, String), NodeId>,
    /// Outgoing adjacency in creation order.
    outgoing: HashMap<NodeId, Vec<(RelKind, NodeId)>>,
    relationship_count: usize,
}

/// Write staged by an open transaction.
enum Staged {
    Node {
        id: NodeId,
        label: Label,
        properties: Vec<(String, String)>,
    },
    Relationship {
        from: NodeId,
        to: NodeId,
        kind: RelKind,
    },
}

pub struct MemoryGraph {
    state: Arc<RwLock<GraphState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraph {
    type Tx = MemoryTx;

    fn begin(&self) -> MemoryTx {
        MemoryTx {
            state: Arc::clone(&self.state),
            next_id: Arc::clone(&self.next_id),
            staged: Vec::new(),
        }
    }

    fn stats(&self) -> StoreStats {
        let state = self.state.read().unwrap();
        StoreStats {
            nodes: state.nodes.len(),
            relationships: state.relationship_count,
        }
    }
}

pub struct MemoryTx {
    state: Arc<RwLock<GraphState>>,
    next_id: Arc<AtomicU64>,
    staged: Vec<Staged>,
}

impl GraphTx for MemoryTx {
    fn find_node(&self, label: Label, property: &str, value: &str) -> Option<NodeId> {
        {
            let state = self.state.read().unwrap();
            let key = (label, property.to_string(), value.to_string());
            if let Some(&id) = state.index.get(&key) {
                return Some(id);
            }
        }

        // Rows staged by this transaction are visible to it before commit.
        self.staged.iter().find_map(|staged| match staged {
            Staged::Node {
                id,
                label: staged_label,
                properties,
            } if *staged_label == label => properties
                .iter()
                .any(|(k, v)| k == property && v == value)
                .then_some(*id),
            _ => None,
        })
    }

    fn create_node(&mut self, label: Label, properties: &[(&str, &str)]) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.staged.push(Staged::Node {
            id,
            label,
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        id
    }

    fn create_relationship(&mut self, from: NodeId, to: NodeId, kind: RelKind) {
        self.staged.push(Staged::Relationship { from, to, kind });
    }

    fn node_property(&self, id: NodeId, property: &str) -> Option<String> {
        {
            let state = self.state.read().unwrap();
            if let Some(node) = state.nodes.get(&id) {
                return node.properties.get(property).cloned();
            }
        }

        self.staged.iter().find_map(|staged| match staged {
            Staged::Node {
                id: staged_id,
                properties,
                ..
            } if *staged_id == id => properties
                .iter()
                .find(|(k, _)| k == property)
                .map(|(_, v)| v.clone()),
            _ => None,
        })
    }

    fn outgoing(&self, from: NodeId, kind: RelKind) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = {
            let state = self.state.read().unwrap();
            state
                .outgoing
                .get(&from)
                .map(|rels| {
                    rels.iter()
                        .filter(|(k, _)| *k == kind)
                        .map(|(_, to)| *to)
                        .collect()
                })
                .unwrap_or_default()
        };

        targets.extend(self.staged.iter().filter_map(|staged| match staged {
            Staged::Relationship {
                from: staged_from,
                to,
                kind: staged_kind,
            } if *staged_from == from && *staged_kind == kind => Some(*to),
            _ => None,
        }));

        targets
    }

    fn commit(self) -> Result<()> {
        let applied = self.staged.len();
        let mut state = self.state.write().unwrap();

        for staged in self.staged {
            match staged {
                Staged::Node {
                    id,
                    label,
                    properties,
                } => {
                    let mut props = HashMap::with_capacity(properties.len());
                    for (key, value) in properties {
                        state
                            .index
                            .entry((label, key.clone(), value.clone()))
                            .or_insert(id);
                        props.insert(key, value);
                    }
                    state.nodes.insert(
                        id,
                        NodeData {
                            label,
                            properties: props,
                        },
                    );
                }
                Staged::Relationship { from, to, kind } => {
                    state.outgoing.entry(from).or_default().push((kind, to));
                    state.relationship_count += 1;
                }
            }
        }

        debug!(applied, nodes = state.nodes.len(), "transaction committed");
        Ok(())
    }

    fn rollback(self) {
        if !self.staged.is_empty() {
            debug!(discarded = self.staged.len(), "transaction rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PROP_IDENTITY, PROP_TITLE, PROP_URL};

    fn commit_identity(graph: &MemoryGraph, key: &str) -> NodeId {
        let mut tx = graph.begin();
        let id = tx.create_node(Label::Identity, &[(PROP_IDENTITY, key)]);
        tx.commit().unwrap();
        id
    }

    fn commit_page(graph: &MemoryGraph, url: &str, title: &str) -> NodeId {
        let mut tx = graph.begin();
        let id = tx.create_node(Label::Page, &[(PROP_URL, url), (PROP_TITLE, title)]);
        tx.commit().unwrap();
        id
    }

    #[test]
    fn test_create_and_find_after_commit() {
        let graph = MemoryGraph::new();
        let id = commit_identity(&graph, "k1");

        let tx = graph.begin();
        assert_eq!(tx.find_node(Label::Identity, PROP_IDENTITY, "k1"), Some(id));
        assert_eq!(tx.find_node(Label::Identity, PROP_IDENTITY, "k2"), None);
        tx.rollback();
    }

    #[test]
    fn test_label_scopes_the_index() {
        let graph = MemoryGraph::new();
        commit_identity(&graph, "k1");

        let tx = graph.begin();
        assert_eq!(tx.find_node(Label::Page, PROP_IDENTITY, "k1"), None);
        tx.rollback();
    }

    #[test]
    fn test_staged_rows_visible_within_tx() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let id = tx.create_node(Label::Identity, &[(PROP_IDENTITY, "k1")]);

        assert_eq!(tx.find_node(Label::Identity, PROP_IDENTITY, "k1"), Some(id));
        assert_eq!(tx.node_property(id, PROP_IDENTITY).as_deref(), Some("k1"));
        tx.rollback();
    }

    #[test]
    fn test_staged_rows_invisible_to_other_txs() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin();
        tx.create_node(Label::Identity, &[(PROP_IDENTITY, "k1")]);

        let reader = graph.begin();
        assert_eq!(reader.find_node(Label::Identity, PROP_IDENTITY, "k1"), None);
        reader.rollback();

        tx.commit().unwrap();
        let reader = graph.begin();
        assert!(reader.find_node(Label::Identity, PROP_IDENTITY, "k1").is_some());
        reader.rollback();
    }

    #[test]
    fn test_rollback_discards_writes() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin();
        tx.create_node(Label::Identity, &[(PROP_IDENTITY, "k1")]);
        tx.rollback();

        assert_eq!(graph.stats().nodes, 0);
        let tx = graph.begin();
        assert_eq!(tx.find_node(Label::Identity, PROP_IDENTITY, "k1"), None);
        tx.rollback();
    }

    #[test]
    fn test_duplicate_keys_both_persist_index_keeps_first() {
        let graph = MemoryGraph::new();
        let first = commit_identity(&graph, "k1");
        let second = commit_identity(&graph, "k1");
        assert_ne!(first, second);

        assert_eq!(graph.stats().nodes, 2);
        let tx = graph.begin();
        assert_eq!(tx.find_node(Label::Identity, PROP_IDENTITY, "k1"), Some(first));
        tx.rollback();
    }

    #[test]
    fn test_outgoing_in_creation_order() {
        let graph = MemoryGraph::new();
        let identity = commit_identity(&graph, "k1");
        let a = commit_page(&graph, "u/A", "A");
        let b = commit_page(&graph, "u/B", "B");
        let hated = commit_page(&graph, "u/C", "C");

        let mut tx = graph.begin();
        tx.create_relationship(identity, a, RelKind::Likes);
        tx.create_relationship(identity, b, RelKind::Likes);
        tx.create_relationship(identity, hated, RelKind::Hates);
        tx.commit().unwrap();

        let tx = graph.begin();
        assert_eq!(tx.outgoing(identity, RelKind::Likes), vec![a, b]);
        assert_eq!(tx.outgoing(identity, RelKind::Hates), vec![hated]);
        assert!(tx.outgoing(a, RelKind::Likes).is_empty());
        tx.rollback();

        assert_eq!(graph.stats().relationships, 3);
    }

    #[test]
    fn test_node_property_reads() {
        let graph = MemoryGraph::new();
        let page = commit_page(&graph, "u/Neo4j", "Neo4j");

        let tx = graph.begin();
        assert_eq!(tx.node_property(page, PROP_URL).as_deref(), Some("u/Neo4j"));
        assert_eq!(tx.node_property(page, PROP_TITLE).as_deref(), Some("Neo4j"));
        assert_eq!(tx.node_property(page, "missing"), None);
        assert_eq!(tx.node_property(NodeId(9999), PROP_URL), None);
        tx.rollback();
    }

    #[test]
    fn test_ids_never_reused_after_rollback() {
        let graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let burned = tx.create_node(Label::Identity, &[(PROP_IDENTITY, "k1")]);
        tx.rollback();

        let committed = commit_identity(&graph, "k1");
        assert_ne!(burned, committed);
    }

    #[test]
    fn test_stats_counts() {
        let graph = MemoryGraph::new();
        assert_eq!(graph.stats().nodes, 0);
        assert_eq!(graph.stats().relationships, 0);

        let identity = commit_identity(&graph, "k1");
        let page = commit_page(&graph, "u/A", "A");
        let mut tx = graph.begin();
        tx.create_relationship(identity, page, RelKind::Likes);
        tx.commit().unwrap();

        assert_eq!(graph.stats().nodes, 2);
        assert_eq!(graph.stats().relationships, 1);
    }
}
