use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Logical fanout targets downstream of a successful ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    /// Media-processing queue: one JSON array of thumbnail URLs per listing.
    Thumbs,
    /// Downstream-processing queue: the normalized field subset.
    Processor,
}

/// Queue collaborator. Delivery is best-effort at-least-once; callers treat
/// failures as non-fatal and downstream consumers are expected to be
/// idempotent.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: Queue, body: &str) -> Result<()>;
}

pub const THUMBS_QUEUE_URL: &str = "THUMBS_QUEUE_URL";
pub const PROCESSOR_QUEUE_URL: &str = "PROCESSOR_QUEUE_URL";

/// POSTs message bodies to per-queue webhook URLs taken from the
/// environment. An unset URL disables that leg.
pub struct WebhookPublisher {
    client: reqwest::Client,
    thumbs_url: Option<String>,
    processor_url: Option<String>,
}

impl WebhookPublisher {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            thumbs_url: env_url(THUMBS_QUEUE_URL),
            processor_url: env_url(PROCESSOR_QUEUE_URL),
        }
    }

    fn url_for(&self, queue: Queue) -> Option<&str> {
        match queue {
            Queue::Thumbs => self.thumbs_url.as_deref(),
            Queue::Processor => self.processor_url.as_deref(),
        }
    }
}

fn env_url(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, queue: Queue, body: &str) -> Result<()> {
        let Some(url) = self.url_for(queue) else {
            debug!("{:?} queue not configured, skipping publish", queue);
            return Ok(());
        };
        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .with_context(|| format!("publishing to {queue:?} queue"))?;
        Ok(())
    }
}
