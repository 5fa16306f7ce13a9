use anyhow::{Context, Result};
use async_trait::async_trait;

/// Outcome of fetching a listing page. A 404 is terminal for the page and
/// handled like a removal; other failures are transient and retried.
#[derive(Debug)]
pub enum Fetched {
    Page(String),
    NotFound,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Fetched> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Fetched::NotFound);
        }
        let resp = resp
            .error_for_status()
            .with_context(|| format!("fetching {url}"))?;
        let body = resp.text().await.with_context(|| format!("reading {url}"))?;
        Ok(Fetched::Page(body))
    }
}
