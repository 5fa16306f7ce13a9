//! Parallel full-table retrieval: the table is partitioned into disjoint
//! segments and one blocking worker drains each segment with keyset paging.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::store::{ListingStore, ScanRequest, StoredListing};

pub const DEFAULT_PAGE_SIZE: usize = 1000;
const PROGRESS_EVERY_PAGES: usize = 100;

/// A segment worker that died mid-scan. Whatever it had already paged in is
/// kept so the snapshot is usable, just flagged as incomplete.
#[derive(Debug)]
pub struct SegmentFailure {
    pub segment: usize,
    pub error: String,
    pub partial_items: Vec<StoredListing>,
}

/// Result of a full retrieval. Complete iff `failures` is empty.
#[derive(Debug)]
pub struct Snapshot {
    pub items: Vec<StoredListing>,
    pub failures: Vec<SegmentFailure>,
}

struct SegmentError {
    error: String,
    partial_items: Vec<StoredListing>,
}

/// Retrieve every stored listing using `workers` disjoint segments scanned in
/// parallel. Segment failures are collected, not fatal.
pub async fn retrieve_all(
    store: Arc<dyn ListingStore>,
    workers: usize,
    page_size: usize,
) -> Result<Snapshot> {
    let workers = workers.max(1);
    let page_size = page_size.max(1);
    info!("retrieving all listings with {} segments", workers);

    let mut handles = Vec::with_capacity(workers);
    for segment in 0..workers {
        let store = Arc::clone(&store);
        handles.push(tokio::task::spawn_blocking(move || {
            scan_segment(store.as_ref(), segment, workers, page_size)
        }));
    }

    let mut snapshot = Snapshot {
        items: Vec::new(),
        failures: Vec::new(),
    };
    for (segment, handle) in handles.into_iter().enumerate() {
        match handle.await? {
            Ok(items) => snapshot.items.extend(items),
            Err(SegmentError {
                error,
                partial_items,
            }) => {
                warn!("segment {} failed: {}", segment, error);
                snapshot.items.extend(partial_items.iter().cloned());
                snapshot.failures.push(SegmentFailure {
                    segment,
                    error,
                    partial_items,
                });
            }
        }
    }

    info!(
        "retrieved {} listings ({} segment failures)",
        snapshot.items.len(),
        snapshot.failures.len()
    );
    Ok(snapshot)
}

fn scan_segment(
    store: &dyn ListingStore,
    segment: usize,
    total_segments: usize,
    page_size: usize,
) -> Result<Vec<StoredListing>, SegmentError> {
    let mut items = Vec::new();
    let mut after = None;
    let mut pages = 0usize;
    loop {
        let page = match store.scan_page(ScanRequest {
            segment,
            total_segments,
            page_size,
            after,
        }) {
            Ok(page) => page,
            Err(err) => {
                return Err(SegmentError {
                    error: format!("{err:#}"),
                    partial_items: items,
                })
            }
        };
        items.extend(page.items);
        pages += 1;
        if pages % PROGRESS_EVERY_PAGES == 0 {
            info!(
                "segment {}/{}: {} pages, {} listings so far",
                segment, total_segments, pages, items.len()
            );
        }
        match page.next {
            Some(cursor) => after = Some(cursor),
            None => return Ok(items),
        }
    }
}
