//! TasteGraph - identity/page resolution service over a graph store
//!
//! # Architecture
//!
//! - **Canonical identities**: emails and phones normalized to one form,
//!   keyed by BLAKE3(canonical)
//! - **Canonical pages**: title <-> URL derivation under a fixed prefix
//! - **Cache-aside reads**: bounded LRU from canonical key to node id
//! - **Write coalescing**: one consumer drains a queue and commits each
//!   batch in a single transaction
//! - **Optimistic creates**: HTTP 201 before durability
//!
//! # Usage example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tastegraph::{BatchWriter, Caches, MemoryGraph, PendingWrite, WriterConfig};
//!
//! # async fn example() -> tastegraph::Result<()> {
//! let store = Arc::new(MemoryGraph::new());
//! let caches = Arc::new(Caches::new(100_000, 100_000));
//! let writer = BatchWriter::spawn(
//!     Arc::clone(&store),
//!     Arc::clone(&caches),
//!     WriterConfig::default(),
//! );
//!
//! let identity = tastegraph::identity::from_email("max@gmail.com")?;
//! writer
//!     .enqueue(PendingWrite::CreateIdentity { key: identity.key })
//!     .await?;
//!
//! // Drains whatever is still queued, then stops the consumer.
//! writer.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod identity;
pub mod page;
pub mod probe;
pub mod server;
pub mod writer;

pub use cache::{Caches, NodeCache};
pub use config::{Config, WriterConfig};
pub use error::{Result, ServiceError};
pub use graph::{GraphStore, GraphTx, Label, MemoryGraph, NodeId, RelKind, StoreStats};
pub use probe::{HttpProbe, UrlProbe};
pub use writer::{BatchWriter, PendingWrite, WriterStats, WriterStatsSnapshot};
