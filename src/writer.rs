//! Write-coalescing batch writer
//!
//! All graph mutations flow through a single long-lived consumer task fed
//! by a bounded channel. Request handlers enqueue fire-and-forget and
//! answer optimistically; the worker folds whatever has queued up into one
//! store transaction per batch and publishes node ids to the caches only
//! after the commit lands.
//!
//! ```text
//! Request task(s)       mpsc (bounded)         Writer task
//!     │                      │                     │
//!     ├─ enqueue() ─────────►│ PendingWrite ──────►│ collect until
//!     │      201 ◄───────────│                     │ max_batch / linger
//!     │                      │                     │ one tx per batch,
//!     │                      │                     │ commit, then cache.put
//! ```
//!
//! Accepted writes are not deduplicated: two creates for the same canonical
//! key that both pass the handler's cache/index checks both persist. The
//! index keeps the first committed node, so readers converge on one winner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::Caches;
use crate::config::WriterConfig;
use crate::error::{Result, ServiceError};
use crate::graph::{GraphStore, GraphTx, Label, NodeId, RelKind, PROP_IDENTITY, PROP_TITLE, PROP_URL};

/// A create accepted by a request handler but not yet durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    CreateIdentity {
        key: String,
    },
    CreatePage {
        url: String,
        title: String,
    },
    /// Relate an identity to a page. Endpoints missing from cache, index
    /// and the running batch are created inside the same transaction; the
    /// carried title covers that case.
    Relate {
        identity_key: String,
        url: String,
        title: String,
        kind: RelKind,
    },
}

enum WriterMessage {
    Write(PendingWrite),
    Shutdown,
}

/// Writer throughput counters, shared with the stats endpoint.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub accepted: AtomicU64,
    pub written: AtomicU64,
    pub batches_committed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub writes_dropped: AtomicU64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WriterStatsSnapshot {
    pub accepted: u64,
    pub written: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub writes_dropped: u64,
}

/// Handle to the single writer task.
pub struct BatchWriter {
    tx: mpsc::Sender<WriterMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WriterStats>,
}

impl BatchWriter {
    /// Spawn the consumer task over `store`.
    pub fn spawn<S: GraphStore>(store: Arc<S>, caches: Arc<Caches>, config: WriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let stats = Arc::new(WriterStats::default());
        let worker = tokio::spawn(writer_loop(store, caches, config, rx, Arc::clone(&stats)));
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    /// Queue a write. Suspends while the queue is full; fails only after
    /// shutdown.
    pub async fn enqueue(&self, write: PendingWrite) -> Result<()> {
        self.tx
            .send(WriterMessage::Write(write))
            .await
            .map_err(|_| ServiceError::WriterClosed)?;
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Stop the worker after draining the queue. Everything enqueued before
    /// this call is committed before it returns.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriterMessage::Shutdown).await;
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                error!(?err, "writer task failed to join");
            }
        }
    }
}

async fn writer_loop<S: GraphStore>(
    store: Arc<S>,
    caches: Arc<Caches>,
    config: WriterConfig,
    mut rx: mpsc::Receiver<WriterMessage>,
    stats: Arc<WriterStats>,
) {
    info!(
        max_batch = config.max_batch,
        flush_interval = ?config.flush_interval,
        "batch writer started"
    );
    let mut batch: Vec<PendingWrite> = Vec::with_capacity(config.max_batch);

    'run: loop {
        // Block until the first write of the next batch.
        match rx.recv().await {
            Some(WriterMessage::Write(write)) => batch.push(write),
            Some(WriterMessage::Shutdown) | None => break 'run,
        }

        // Collect until the batch fills or the linger window closes.
        let deadline = Instant::now() + config.flush_interval;
        let mut shutting_down = false;
        while batch.len() < config.max_batch {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(WriterMessage::Write(write))) => batch.push(write),
                Ok(Some(WriterMessage::Shutdown)) | Ok(None) => {
                    shutting_down = true;
                    break;
                }
                Err(_) => break, // linger elapsed
            }
        }

        commit_batch(store.as_ref(), &caches, &mut batch, &config, &stats).await;

        if shutting_down {
            break 'run;
        }
    }

    // Drain writes that raced in behind the shutdown message.
    while let Ok(message) = rx.try_recv() {
        if let WriterMessage::Write(write) = message {
            batch.push(write);
        }
    }
    commit_batch(store.as_ref(), &caches, &mut batch, &config, &stats).await;

    info!(
        batches = stats.batches_committed.load(Ordering::Relaxed),
        writes = stats.written.load(Ordering::Relaxed),
        "batch writer stopped"
    );
}

/// Commit one batch, retrying on store failure. After the last attempt the
/// batch is dropped; none of its writes reach the caches.
async fn commit_batch<S: GraphStore>(
    store: &S,
    caches: &Caches,
    batch: &mut Vec<PendingWrite>,
    config: &WriterConfig,
    stats: &WriterStats,
) {
    if batch.is_empty() {
        return;
    }

    let size = batch.len();
    for attempt in 0..=config.commit_retries {
        match apply_batch(store, caches, batch) {
            Ok(created) => {
                for (label, key, id) in created {
                    caches.for_label(label).put(key, id);
                }
                stats.batches_committed.fetch_add(1, Ordering::Relaxed);
                stats.written.fetch_add(size as u64, Ordering::Relaxed);
                debug!(size, attempt, "batch committed");
                batch.clear();
                return;
            }
            Err(err) => {
                warn!(size, attempt, %err, "batch commit failed");
                if attempt < config.commit_retries {
                    sleep(config.retry_backoff).await;
                }
            }
        }
    }

    error!(dropped = size, "batch permanently failed, dropping writes");
    stats.batches_failed.fetch_add(1, Ordering::Relaxed);
    stats.writes_dropped.fetch_add(size as u64, Ordering::Relaxed);
    batch.clear();
}

/// Apply a batch inside one transaction. Returns the nodes it created so
/// the caller can publish them to the caches once the commit is durable.
fn apply_batch<S: GraphStore>(
    store: &S,
    caches: &Caches,
    batch: &[PendingWrite],
) -> Result<Vec<(Label, String, NodeId)>> {
    let mut tx = store.begin();
    let mut created = Vec::new();

    for write in batch {
        match write {
            PendingWrite::CreateIdentity { key } => {
                let id = tx.create_node(Label::Identity, &[(PROP_IDENTITY, key.as_str())]);
                created.push((Label::Identity, key.clone(), id));
            }
            PendingWrite::CreatePage { url, title } => {
                let id = tx.create_node(
                    Label::Page,
                    &[(PROP_URL, url.as_str()), (PROP_TITLE, title.as_str())],
                );
                created.push((Label::Page, url.clone(), id));
            }
            PendingWrite::Relate {
                identity_key,
                url,
                title,
                kind,
            } => {
                let from = resolve_identity(&mut tx, caches, identity_key, &mut created);
                let to = resolve_page(&mut tx, caches, url, title, &mut created);
                tx.create_relationship(from, to, *kind);
            }
        }
    }

    tx.commit()?;
    Ok(created)
}

fn resolve_identity<T: GraphTx>(
    tx: &mut T,
    caches: &Caches,
    key: &str,
    created: &mut Vec<(Label, String, NodeId)>,
) -> NodeId {
    if let Some(id) = caches.identities.get(key) {
        return id;
    }
    if let Some(id) = tx.find_node(Label::Identity, PROP_IDENTITY, key) {
        return id;
    }
    let id = tx.create_node(Label::Identity, &[(PROP_IDENTITY, key)]);
    created.push((Label::Identity, key.to_string(), id));
    id
}

fn resolve_page<T: GraphTx>(
    tx: &mut T,
    caches: &Caches,
    url: &str,
    title: &str,
    created: &mut Vec<(Label, String, NodeId)>,
) -> NodeId {
    if let Some(id) = caches.pages.get(url) {
        return id;
    }
    if let Some(id) = tx.find_node(Label::Page, PROP_URL, url) {
        return id;
    }
    let id = tx.create_node(Label::Page, &[(PROP_URL, url), (PROP_TITLE, title)]);
    created.push((Label::Page, url.to_string(), id));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraph, MemoryTx, StoreStats};

    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn test_config() -> WriterConfig {
        WriterConfig {
            queue_capacity: 64,
            max_batch: 8,
            flush_interval: Duration::from_millis(20),
            commit_retries: 2,
            retry_backoff: Duration::from_millis(5),
        }
    }

    fn test_writer(config: WriterConfig) -> (Arc<MemoryGraph>, Arc<Caches>, BatchWriter) {
        let store = Arc::new(MemoryGraph::new());
        let caches = Arc::new(Caches::new(64, 64));
        let writer = BatchWriter::spawn(Arc::clone(&store), Arc::clone(&caches), config);
        (store, caches, writer)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(5)).await;
        }
    }

    fn identity(key: &str) -> PendingWrite {
        PendingWrite::CreateIdentity { key: key.to_string() }
    }

    fn relate(key: &str, url: &str, title: &str, kind: RelKind) -> PendingWrite {
        PendingWrite::Relate {
            identity_key: key.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_writes_become_visible() {
        let (store, _caches, writer) = test_writer(test_config());

        writer.enqueue(identity("k1")).await.unwrap();
        writer.enqueue(identity("k2")).await.unwrap();
        writer.enqueue(identity("k3")).await.unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 3).await;
        assert_eq!(store.stats().nodes, 3);

        let tx = store.begin();
        assert!(tx.find_node(Label::Identity, PROP_IDENTITY, "k2").is_some());
        tx.rollback();
    }

    #[tokio::test]
    async fn test_writes_coalesce_into_one_batch() {
        let mut config = test_config();
        config.max_batch = 10;
        config.flush_interval = Duration::from_secs(1);
        let (store, _caches, writer) = test_writer(config);

        for i in 0..10 {
            writer.enqueue(identity(&format!("k{i}"))).await.unwrap();
        }

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 10).await;
        assert_eq!(writer.stats().batches_committed.load(Ordering::Relaxed), 1);
        assert_eq!(store.stats().nodes, 10);
    }

    #[tokio::test]
    async fn test_size_threshold_flushes_before_linger() {
        let mut config = test_config();
        config.max_batch = 2;
        config.flush_interval = Duration::from_secs(10);
        let (store, _caches, writer) = test_writer(config);

        for i in 0..4 {
            writer.enqueue(identity(&format!("k{i}"))).await.unwrap();
        }

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 4).await;
        assert_eq!(writer.stats().batches_committed.load(Ordering::Relaxed), 2);
        assert_eq!(store.stats().nodes, 4);
    }

    #[tokio::test]
    async fn test_linger_flushes_partial_batch() {
        let mut config = test_config();
        config.max_batch = 100;
        config.flush_interval = Duration::from_millis(25);
        let (store, _caches, writer) = test_writer(config);

        writer.enqueue(identity("k1")).await.unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 1).await;
        assert_eq!(store.stats().nodes, 1);
    }

    #[tokio::test]
    async fn test_cache_updated_after_commit() {
        let (store, caches, writer) = test_writer(test_config());

        writer.enqueue(identity("k1")).await.unwrap();
        wait_until(|| caches.identities.get("k1").is_some()).await;

        let tx = store.begin();
        assert_eq!(
            tx.find_node(Label::Identity, PROP_IDENTITY, "k1"),
            caches.identities.get("k1")
        );
        tx.rollback();
    }

    #[tokio::test]
    async fn test_duplicate_accepted_writes_both_persist() {
        let (store, _caches, writer) = test_writer(test_config());

        writer.enqueue(identity("k1")).await.unwrap();
        writer.enqueue(identity("k1")).await.unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 2).await;
        assert_eq!(store.stats().nodes, 2);
    }

    #[tokio::test]
    async fn test_relate_creates_missing_endpoints() {
        let (store, caches, writer) = test_writer(test_config());

        writer
            .enqueue(relate("k1", "u/Neo4j", "Neo4j", RelKind::Likes))
            .await
            .unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 1).await;
        assert_eq!(store.stats().nodes, 2);
        assert_eq!(store.stats().relationships, 1);
        assert!(caches.identities.get("k1").is_some());
        assert!(caches.pages.get("u/Neo4j").is_some());
    }

    #[tokio::test]
    async fn test_relate_reuses_committed_endpoints() {
        let (store, _caches, writer) = test_writer(test_config());

        let mut tx = store.begin();
        let from = tx.create_node(Label::Identity, &[(PROP_IDENTITY, "k1")]);
        let to = tx.create_node(Label::Page, &[(PROP_URL, "u/Neo4j"), (PROP_TITLE, "Neo4j")]);
        tx.commit().unwrap();

        writer
            .enqueue(relate("k1", "u/Neo4j", "Neo4j", RelKind::Hates))
            .await
            .unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 1).await;
        assert_eq!(store.stats().nodes, 2);

        let tx = store.begin();
        assert_eq!(tx.outgoing(from, RelKind::Hates), vec![to]);
        tx.rollback();
    }

    #[tokio::test]
    async fn test_relate_sees_creates_from_same_batch() {
        let mut config = test_config();
        config.max_batch = 3;
        config.flush_interval = Duration::from_millis(500);
        let (store, _caches, writer) = test_writer(config);

        writer.enqueue(identity("k1")).await.unwrap();
        writer
            .enqueue(PendingWrite::CreatePage {
                url: "u/Neo4j".to_string(),
                title: "Neo4j".to_string(),
            })
            .await
            .unwrap();
        writer
            .enqueue(relate("k1", "u/Neo4j", "Neo4j", RelKind::Likes))
            .await
            .unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 3).await;
        assert_eq!(writer.stats().batches_committed.load(Ordering::Relaxed), 1);
        // The relate resolved against staged rows instead of creating copies.
        assert_eq!(store.stats().nodes, 2);
        assert_eq!(store.stats().relationships, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let mut config = test_config();
        config.max_batch = 1000;
        config.flush_interval = Duration::from_secs(10);
        let (store, _caches, writer) = test_writer(config);

        for i in 0..5 {
            writer.enqueue(identity(&format!("k{i}"))).await.unwrap();
        }
        writer.shutdown().await;

        assert_eq!(writer.stats().written.load(Ordering::Relaxed), 5);
        assert_eq!(store.stats().nodes, 5);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let (_store, _caches, writer) = test_writer(test_config());
        writer.shutdown().await;

        let err = writer.enqueue(identity("k1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::WriterClosed));
    }

    // Store wrapper that fails the first `failures` commits.
    struct FlakyStore {
        inner: MemoryGraph,
        failures: Arc<AtomicU32>,
    }

    struct FlakyTx {
        inner: MemoryTx,
        failures: Arc<AtomicU32>,
    }

    impl GraphStore for FlakyStore {
        type Tx = FlakyTx;

        fn begin(&self) -> FlakyTx {
            FlakyTx {
                inner: self.inner.begin(),
                failures: Arc::clone(&self.failures),
            }
        }

        fn stats(&self) -> StoreStats {
            self.inner.stats()
        }
    }

    impl GraphTx for FlakyTx {
        fn find_node(&self, label: Label, property: &str, value: &str) -> Option<NodeId> {
            self.inner.find_node(label, property, value)
        }

        fn create_node(&mut self, label: Label, properties: &[(&str, &str)]) -> NodeId {
            self.inner.create_node(label, properties)
        }

        fn create_relationship(&mut self, from: NodeId, to: NodeId, kind: RelKind) {
            self.inner.create_relationship(from, to, kind)
        }

        fn node_property(&self, id: NodeId, property: &str) -> Option<String> {
            self.inner.node_property(id, property)
        }

        fn outgoing(&self, from: NodeId, kind: RelKind) -> Vec<NodeId> {
            self.inner.outgoing(from, kind)
        }

        fn commit(self) -> Result<()> {
            if self.failures.load(Ordering::Relaxed) > 0 {
                self.failures.fetch_sub(1, Ordering::Relaxed);
                self.inner.rollback();
                return Err(ServiceError::Store("injected commit failure".to_string()));
            }
            self.inner.commit()
        }

        fn rollback(self) {
            self.inner.rollback()
        }
    }

    fn flaky_writer(
        failures: u32,
        config: WriterConfig,
    ) -> (Arc<FlakyStore>, Arc<Caches>, BatchWriter) {
        let store = Arc::new(FlakyStore {
            inner: MemoryGraph::new(),
            failures: Arc::new(AtomicU32::new(failures)),
        });
        let caches = Arc::new(Caches::new(64, 64));
        let writer = BatchWriter::spawn(Arc::clone(&store), Arc::clone(&caches), config);
        (store, caches, writer)
    }

    #[tokio::test]
    async fn test_failed_commit_retries_then_succeeds() {
        let (store, _caches, writer) = flaky_writer(1, test_config());

        writer.enqueue(identity("k1")).await.unwrap();

        wait_until(|| writer.stats().written.load(Ordering::Relaxed) == 1).await;
        assert_eq!(writer.stats().batches_committed.load(Ordering::Relaxed), 1);
        assert_eq!(writer.stats().batches_failed.load(Ordering::Relaxed), 0);
        assert_eq!(store.stats().nodes, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_batch_loudly() {
        let (store, caches, writer) = flaky_writer(u32::MAX, test_config());

        writer.enqueue(identity("k1")).await.unwrap();

        wait_until(|| writer.stats().batches_failed.load(Ordering::Relaxed) == 1).await;
        assert_eq!(writer.stats().writes_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(writer.stats().written.load(Ordering::Relaxed), 0);
        // The dropped batch never touched the store or the caches.
        assert_eq!(store.stats().nodes, 0);
        assert!(caches.identities.is_empty());
    }
}
