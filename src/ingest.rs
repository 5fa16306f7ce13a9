//! Envelope decoding and the ingestion coordinator: fetch, extract,
//! fingerprint, dedup, store, fan out.

use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::fetch::{Fetched, PageFetcher};
use crate::fingerprint;
use crate::listing::{Listing, ProcessorMessage};
use crate::parser::{self, ParseError};
use crate::queue::{Publisher, Queue};
use crate::store::{ListingStore, PutResult, StoredListing};

pub const DEFAULT_CONCURRENCY: usize = 10;
const MAX_ATTEMPTS: u32 = 3;

/// Crawl-supplied ingestion envelope: the listing URL plus whatever feed
/// metadata the crawler attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "sourceUrl")]
    pub source_url: String,
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

/// Decode a raw transport body into JSON. Raw newlines inside the body are
/// escaped first so multi-line post content survives decoding.
pub fn parse_request_body(raw: &str) -> serde_json::Result<Value> {
    serde_json::from_str(&raw.replace('\n', "\\n"))
}

/// Boundary decode of one envelope; rejects malformed bodies before they
/// reach the extractor.
pub fn parse_envelope(raw: &str) -> Result<Envelope> {
    let value = parse_request_body(raw).context("could not parse request body")?;
    let envelope = serde_json::from_value(value).context("invalid envelope")?;
    Ok(envelope)
}

/// Terminal result of one ingestion. `Removed` and `Duplicate` are expected
/// outcomes, not errors; `Failed` means retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ingested { id: String },
    Duplicate { id: String },
    Removed,
    Failed { reason: String },
}

/// Wire shape reported for a removed or not-found posting.
pub fn removed_response(envelope: &Envelope) -> Value {
    json!({ "message": "post removed", "item": envelope })
}

/// Orchestrates one envelope end to end with at-most-once store effects per
/// content fingerprint. Collaborators are injected so tests can run against
/// fakes.
pub struct Coordinator {
    store: Arc<dyn ListingStore>,
    fetcher: Arc<dyn PageFetcher>,
    publisher: Arc<dyn Publisher>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ListingStore>,
        fetcher: Arc<dyn PageFetcher>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            fetcher,
            publisher,
        }
    }

    /// One end-to-end attempt. Transient failures surface as `Err` so the
    /// caller can retry; terminal paths map onto `Outcome`.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<Outcome> {
        let html = match self.fetcher.fetch(&envelope.source_url).await? {
            Fetched::Page(html) => html,
            Fetched::NotFound => {
                info!("post not found: {}", envelope.source_url);
                return Ok(Outcome::Removed);
            }
        };

        let listing = match parser::parse_listing(&html) {
            Ok(listing) => listing,
            Err(ParseError::Removed(_)) => {
                info!("post removed: {}", envelope.source_url);
                return Ok(Outcome::Removed);
            }
            // schema drift must be noticed, never defaulted away
            Err(err) => {
                return Err(err).with_context(|| format!("parsing {}", envelope.source_url));
            }
        };

        let mut item = envelope_map(envelope);
        merge_parsed(&mut item, &listing)?;

        // id is a function of content only; stamp it and the timestamp after
        // hashing so volatile fields never feed the fingerprint
        let id = fingerprint::generate_id(&item);
        let added = chrono::Utc::now().timestamp_millis();
        item.insert("id".into(), Value::String(id.clone()));
        item.insert("added".into(), json!(added));

        if self.store.exists(&id)? {
            info!("duplicate post: {}, {}", id, envelope.source_url);
            return Ok(Outcome::Duplicate { id });
        }

        let stored = StoredListing {
            id: id.clone(),
            added,
            item: Value::Object(item),
        };
        if let PutResult::AlreadyExists = self.store.put(&stored)? {
            info!("duplicate post (insert race): {}", id);
            return Ok(Outcome::Duplicate { id });
        }

        // the store write is the durability boundary; everything after is
        // best-effort
        self.fan_out(&id, &listing, &envelope.source_url).await;
        Ok(Outcome::Ingested { id })
    }

    async fn fan_out(&self, id: &str, listing: &Listing, url: &str) {
        if listing.thumbs.is_empty() {
            info!("no thumbs found");
        } else {
            match serde_json::to_string(&listing.thumbs) {
                Ok(body) => {
                    if let Err(err) = self.publisher.publish(Queue::Thumbs, &body).await {
                        warn!("thumbs publish failed for {}: {:#}", id, err);
                    }
                }
                Err(err) => warn!("could not encode thumbs for {}: {}", id, err),
            }
        }

        match serde_json::to_string(&ProcessorMessage::from_listing(listing, url)) {
            Ok(body) => {
                if let Err(err) = self.publisher.publish(Queue::Processor, &body).await {
                    warn!("processor publish failed for {}: {:#}", id, err);
                }
            }
            Err(err) => warn!("could not encode processor message for {}: {}", id, err),
        }
    }

    /// Bounded retries with no wait between attempts; exhaustion becomes a
    /// `Failed` outcome and the caller moves on.
    pub async fn ingest_with_retry(&self, envelope: &Envelope) -> Outcome {
        let mut reason = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.ingest(envelope).await {
                Ok(outcome) => return outcome,
                Err(err) => {
                    warn!(
                        "attempt {}/{} failed for {}: {:#}",
                        attempt, MAX_ATTEMPTS, envelope.source_url, err
                    );
                    reason = format!("{err:#}");
                }
            }
        }
        info!("giving up on {}", envelope.source_url);
        Outcome::Failed { reason }
    }
}

fn envelope_map(envelope: &Envelope) -> Map<String, Value> {
    let mut item = envelope.meta.clone();
    item.insert("sourceUrl".into(), Value::String(envelope.source_url.clone()));
    item
}

/// Merge extracted fields into the item under the `parsed_` namespace.
fn merge_parsed(item: &mut Map<String, Value>, listing: &Listing) -> Result<()> {
    match serde_json::to_value(listing)? {
        Value::Object(fields) => {
            for (key, value) in fields {
                item.insert(format!("parsed_{key}"), value);
            }
            Ok(())
        }
        other => anyhow::bail!("listing serialized to {other:?}, expected an object"),
    }
}

/// Per-run tallies for a batch of envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub total: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Run envelopes through the coordinator concurrently. Workers send their
/// outcomes over a channel; this loop is the only place tallies change.
pub async fn ingest_stream(
    coordinator: Arc<Coordinator>,
    envelopes: Vec<Envelope>,
    concurrency: usize,
) -> Result<IngestStats> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let total = envelopes.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = mpsc::channel::<Outcome>(concurrency.max(1) * 2);
    for envelope in envelopes {
        let coordinator = Arc::clone(&coordinator);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let outcome = coordinator.ingest_with_retry(&envelope).await;
            let _ = tx.send(outcome).await;
        });
    }
    // rx closes once every spawned task has finished
    drop(tx);

    let mut stats = IngestStats {
        total,
        ..Default::default()
    };
    while let Some(outcome) = rx.recv().await {
        match outcome {
            Outcome::Ingested { .. } => stats.ingested += 1,
            Outcome::Duplicate { .. } => stats.duplicates += 1,
            Outcome::Removed => stats.removed += 1,
            Outcome::Failed { .. } => stats.failed += 1,
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "ingested {} envelopes ({} new, {} duplicates, {} removed, {} gave up)",
        stats.total, stats.ingested, stats.duplicates, stats.removed, stats.failed
    );
    Ok(stats)
}
