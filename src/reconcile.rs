//! Corrective sweep over stored listings: recompute a derived field from its
//! source text and patch records where the saved value drifted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::parser::derive;
use crate::store::{ListingStore, ScanRequest};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_WORKERS: usize = 10;
const REPORT_EVERY: usize = 100;

/// Fields recomputable from the housing snippet saved at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DerivedField {
    Bedrooms,
    Area,
}

impl DerivedField {
    pub fn source_key(self) -> &'static str {
        "parsed_housing"
    }

    pub fn target_key(self) -> &'static str {
        match self {
            DerivedField::Bedrooms => "parsed_bedrooms",
            DerivedField::Area => "parsed_area",
        }
    }

    fn recompute(self, source: &str) -> Option<f64> {
        match self {
            DerivedField::Bedrooms => derive::get_bedrooms(source),
            DerivedField::Area => derive::get_area(source),
        }
    }
}

/// What one record needs, decided purely from its document.
#[derive(Debug, PartialEq)]
pub enum Decision {
    /// Source key absent: nothing to recompute from.
    NoSource,
    /// Source key present but null.
    SourceNull,
    /// Source text yields no value for this field.
    NotDerivable,
    Update { value: f64, reason: UpdateReason },
    Correct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// Target key absent from the document.
    Missing,
    /// Target key saved as null.
    SavedNull,
    /// Saved value disagrees with the recomputed one.
    Mismatch,
}

pub fn decide(field: DerivedField, item: &Map<String, Value>) -> Decision {
    let source = match item.get(field.source_key()) {
        None => return Decision::NoSource,
        Some(Value::Null) => return Decision::SourceNull,
        Some(Value::String(s)) => s.as_str(),
        // anything non-string cannot be re-derived
        Some(_) => return Decision::NotDerivable,
    };
    let Some(value) = field.recompute(source) else {
        return Decision::NotDerivable;
    };
    match item.get(field.target_key()) {
        None => Decision::Update {
            value,
            reason: UpdateReason::Missing,
        },
        Some(Value::Null) => Decision::Update {
            value,
            reason: UpdateReason::SavedNull,
        },
        Some(saved) => {
            if saved.as_f64() == Some(value) {
                Decision::Correct
            } else {
                Decision::Update {
                    value,
                    reason: UpdateReason::Mismatch,
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileCounts {
    pub total: usize,
    pub no_source: usize,
    pub source_null: usize,
    pub not_derivable: usize,
    pub missing: usize,
    pub saved_null: usize,
    pub corrected: usize,
    pub correct: usize,
    pub failed: usize,
}

impl ReconcileCounts {
    /// Records whose stored value changed this run.
    pub fn updates(&self) -> usize {
        self.missing + self.saved_null + self.corrected
    }

    pub fn print(&self) {
        println!("records examined:   {}", self.total);
        println!("already correct:    {}", self.correct);
        println!("filled (missing):   {}", self.missing);
        println!("filled (was null):  {}", self.saved_null);
        println!("corrected mismatch: {}", self.corrected);
        println!("not derivable:      {}", self.not_derivable);
        println!("source null:        {}", self.source_null);
        println!("no source field:    {}", self.no_source);
        println!("failed:             {}", self.failed);
    }
}

enum RecordOutcome {
    Decided(Decision),
    Failed,
}

fn process_record(
    store: &dyn ListingStore,
    field: DerivedField,
    id: &str,
    item: &Map<String, Value>,
) -> Result<Decision> {
    let decision = decide(field, item);
    if let Decision::Update { value, .. } = decision {
        store
            .update_field(id, field.target_key(), &json!(value))
            .with_context(|| format!("updating {} on {id}", field.target_key()))?;
    }
    Ok(decision)
}

/// Sweep every stored record, recomputing `field` and patching drifted
/// values. Scans pages inline and spawns a bounded worker per record; a
/// failed record is tallied and skipped, never fatal.
pub async fn reconcile(
    store: Arc<dyn ListingStore>,
    field: DerivedField,
    workers: usize,
    page_size: usize,
) -> Result<ReconcileCounts> {
    info!(
        "reconciling {} from {}",
        field.target_key(),
        field.source_key()
    );
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let (tx, mut rx) = mpsc::channel::<RecordOutcome>(workers.max(1) * 2);

    let mut spawned = 0usize;
    let mut after = None;
    loop {
        let page = {
            let store = Arc::clone(&store);
            let req = ScanRequest {
                segment: 0,
                total_segments: 1,
                page_size: page_size.max(1),
                after,
            };
            tokio::task::spawn_blocking(move || store.scan_page(req)).await??
        };
        for record in page.items {
            let store = Arc::clone(&store);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let outcome = tokio::task::spawn_blocking(move || {
                    let item = match record.item.as_object() {
                        Some(item) => item,
                        None => {
                            warn!("record {} is not an object", record.id);
                            return RecordOutcome::Failed;
                        }
                    };
                    match process_record(store.as_ref(), field, &record.id, item) {
                        Ok(decision) => RecordOutcome::Decided(decision),
                        Err(err) => {
                            warn!("record {} failed: {:#}", record.id, err);
                            RecordOutcome::Failed
                        }
                    }
                })
                .await
                .unwrap_or(RecordOutcome::Failed);
                let _ = tx.send(outcome).await;
            });
            spawned += 1;
        }
        match page.next {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }
    drop(tx);

    let mut counts = ReconcileCounts::default();
    while let Some(outcome) = rx.recv().await {
        counts.total += 1;
        match outcome {
            RecordOutcome::Decided(Decision::NoSource) => counts.no_source += 1,
            RecordOutcome::Decided(Decision::SourceNull) => counts.source_null += 1,
            RecordOutcome::Decided(Decision::NotDerivable) => counts.not_derivable += 1,
            RecordOutcome::Decided(Decision::Correct) => counts.correct += 1,
            RecordOutcome::Decided(Decision::Update { reason, .. }) => match reason {
                UpdateReason::Missing => counts.missing += 1,
                UpdateReason::SavedNull => counts.saved_null += 1,
                UpdateReason::Mismatch => counts.corrected += 1,
            },
            RecordOutcome::Failed => counts.failed += 1,
        }
        if counts.total % REPORT_EVERY == 0 {
            info!("processed {}/{} records", counts.total, spawned);
        }
    }

    info!(
        "reconcile done: {} records, {} updated, {} failed",
        counts.total,
        counts.updates(),
        counts.failed
    );
    Ok(counts)
}
