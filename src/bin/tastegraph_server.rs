//! TasteGraph server - HTTP front end for the resolution service
//!
//! Canonicalizes identities and pages, answers creates optimistically, and
//! funnels every write through the single batch-writing consumer.
//!
//! Usage:
//!   tastegraph-server [--bind 127.0.0.1:8080] [--url-prefix <prefix>]
//!
//! Every flag can also be set through a TASTEGRAPH_* environment variable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use tastegraph::config::{
    Config, WriterConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BATCH,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_REGION, DEFAULT_URL_PREFIX,
};
use tastegraph::probe::{HttpProbe, UrlProbe};
use tastegraph::server::{self, AppContext};
use tastegraph::{BatchWriter, Caches, MemoryGraph};

#[derive(Parser, Debug)]
#[command(
    name = "tastegraph-server",
    version,
    about = "Identity/page resolution service over a property graph"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "TASTEGRAPH_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Required prefix for page URLs; titles are resolved under it.
    #[arg(long, env = "TASTEGRAPH_URL_PREFIX", default_value = DEFAULT_URL_PREFIX)]
    url_prefix: String,

    /// Region hint for phone numbers submitted without a country code.
    #[arg(long, env = "TASTEGRAPH_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// Pending-write queue capacity.
    #[arg(long, env = "TASTEGRAPH_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Maximum writes folded into one store transaction.
    #[arg(long, env = "TASTEGRAPH_MAX_BATCH", default_value_t = DEFAULT_MAX_BATCH)]
    max_batch: usize,

    /// Milliseconds a partial batch may linger before it is flushed.
    #[arg(
        long,
        env = "TASTEGRAPH_FLUSH_INTERVAL_MS",
        default_value_t = DEFAULT_FLUSH_INTERVAL.as_millis() as u64
    )]
    flush_interval_ms: u64,

    /// Entries held by each node-id cache.
    #[arg(long, env = "TASTEGRAPH_CACHE_CAPACITY", default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_capacity: usize,

    /// Seconds before an outbound HEAD probe gives up.
    #[arg(
        long,
        env = "TASTEGRAPH_PROBE_TIMEOUT_SECS",
        default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs()
    )]
    probe_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            bind: self.bind,
            url_prefix: self.url_prefix,
            default_region: self.region,
            identity_cache_capacity: self.cache_capacity,
            page_cache_capacity: self.cache_capacity,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            writer: WriterConfig {
                queue_capacity: self.queue_capacity,
                max_batch: self.max_batch,
                flush_interval: Duration::from_millis(self.flush_interval_ms),
                ..WriterConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::install_tracing_subscriber();

    let config = Args::parse().into_config();
    info!(bind = %config.bind, prefix = %config.url_prefix, "starting tastegraph-server");

    let store = Arc::new(MemoryGraph::new());
    let caches = Arc::new(Caches::new(
        config.identity_cache_capacity,
        config.page_cache_capacity,
    ));
    let writer = Arc::new(BatchWriter::spawn(
        Arc::clone(&store),
        Arc::clone(&caches),
        config.writer.clone(),
    ));
    let probe: Arc<dyn UrlProbe> = Arc::new(HttpProbe::new(config.probe_timeout)?);

    let state = Arc::new(AppContext {
        store,
        caches,
        writer: Arc::clone(&writer),
        probe,
        url_prefix: config.url_prefix.clone(),
        default_region: config.default_region.clone(),
    });

    server::serve(config.bind, state).await?;

    // The listener is down; drain whatever the queue still holds.
    writer.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
