//! Property-graph adapter and embedded engine

pub mod memory;

pub use memory::{MemoryGraph, MemoryTx};

use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// Property key identity hashes are stored and indexed under.
pub const PROP_IDENTITY: &str = "identity";
/// Property key page URLs are stored and indexed under.
pub const PROP_URL: &str = "url";
/// Property key page titles are stored under.
pub const PROP_TITLE: &str = "title";

/// Node labels the service creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Identity,
    Page,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Identity => "Identity",
            Label::Page => "Page",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship kinds from identities to pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelKind {
    Likes,
    Hates,
}

impl RelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelKind::Likes => "LIKES",
            RelKind::Hates => "HATES",
        }
    }
}

impl fmt::Display for RelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque store-assigned node identifier. Never reused for the lifetime of
/// a store, including ids burned by rolled-back transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Committed-state counters surfaced by the stats endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub nodes: usize,
    pub relationships: usize,
}

/// Transactional slice of a graph database the resolution pipeline needs:
/// label+property index lookups, node/relationship creation, single-hop
/// outgoing reads.
pub trait GraphStore: Send + Sync + 'static {
    type Tx: GraphTx;

    /// Open a transaction. Used both for short-lived existence reads and
    /// for the writer's one-transaction-per-batch commits.
    fn begin(&self) -> Self::Tx;

    fn stats(&self) -> StoreStats;
}

/// A unit of work against the store. Writes stage locally and become
/// visible to other transactions only on commit; dropping a transaction
/// without committing discards them.
pub trait GraphTx {
    /// Index lookup by label + property value. Committed rows win over rows
    /// staged by this transaction.
    fn find_node(&self, label: Label, property: &str, value: &str) -> Option<NodeId>;

    fn create_node(&mut self, label: Label, properties: &[(&str, &str)]) -> NodeId;

    fn create_relationship(&mut self, from: NodeId, to: NodeId, kind: RelKind);

    fn node_property(&self, id: NodeId, property: &str) -> Option<String>;

    /// Outgoing relationships of one kind, in creation order.
    fn outgoing(&self, from: NodeId, kind: RelKind) -> Vec<NodeId>;

    fn commit(self) -> Result<()>;

    fn rollback(self);
}
