//! Outbound reachability probe for submitted page URLs

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Reachability check run before an unknown page is queued for creation.
/// Behind a trait so tests can answer without touching the network.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    /// HEAD the url and return the observed HTTP status code.
    async fn status(&self, url: &str) -> Result<u16>;
}

/// reqwest-backed probe the server binary runs with.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        let response = self.client.head(url).send().await?;
        Ok(response.status().as_u16())
    }
}
