//! Store contract and its SQLite implementation.
//!
//! Single table keyed by the content fingerprint; the full item document is
//! kept as JSON text, so floats persist in their shortest round-trip decimal
//! rendering (exact and platform-independent). Segmented scans partition on
//! `rowid % total_segments` with a keyset cursor per segment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

/// One persisted listing: fingerprint id, ingestion timestamp (unixtime ms),
/// and the full item document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredListing {
    pub id: String,
    pub added: i64,
    pub item: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    Created,
    /// The primary key already holds a row; the write did not happen.
    AlreadyExists,
}

/// Parameters for one page of a segmented scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest {
    /// Segment index, `0..total_segments`.
    pub segment: usize,
    pub total_segments: usize,
    pub page_size: usize,
    /// Keyset cursor from the previous page; `None` starts the segment.
    pub after: Option<i64>,
}

/// One page of results. `next` resumes the segment; `None` means exhausted.
#[derive(Debug)]
pub struct ScanPage {
    pub items: Vec<StoredListing>,
    pub next: Option<i64>,
}

/// Store collaborator injected into the coordinator, retriever, and
/// reconcile pool so tests can substitute fixtures.
pub trait ListingStore: Send + Sync {
    /// Existence check projecting only the key.
    fn exists(&self, id: &str) -> Result<bool>;
    fn get(&self, id: &str) -> Result<Option<StoredListing>>;
    fn put(&self, listing: &StoredListing) -> Result<PutResult>;
    /// Single-field corrective update on the stored document.
    fn update_field(&self, id: &str, field: &str, value: &Value) -> Result<()>;
    fn scan_page(&self, req: ScanRequest) -> Result<ScanPage>;
    fn count(&self) -> Result<usize>;
    /// Rows where `field` holds a non-null value.
    fn field_count(&self, field: &str) -> Result<usize>;
}

/// SQLite-backed store. Opens a connection per operation so parallel segment
/// workers never share a handle; WAL keeps readers and the writer out of
/// each other's way.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating store directory {}", dir.display()))?;
        }
        let store = Self { path };
        let conn = store.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS listings (
                id    TEXT PRIMARY KEY,
                added INTEGER NOT NULL,
                item  TEXT NOT NULL
            );",
        )?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("opening store {}", self.path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(conn)
    }
}

impl ListingStore for SqliteStore {
    fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM listings WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, id: &str) -> Result<Option<StoredListing>> {
        let conn = self.conn()?;
        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT id, added, item FROM listings WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            Some((id, added, item)) => Ok(Some(StoredListing {
                id,
                added,
                item: serde_json::from_str(&item).context("decoding stored item")?,
            })),
            None => Ok(None),
        }
    }

    fn put(&self, listing: &StoredListing) -> Result<PutResult> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO listings (id, added, item) VALUES (?1, ?2, ?3)",
            rusqlite::params![listing.id, listing.added, listing.item.to_string()],
        );
        match result {
            Ok(_) => Ok(PutResult::Created),
            // lost an insert race on the same fingerprint
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(PutResult::AlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update_field(&self, id: &str, field: &str, value: &Value) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE listings SET item = json_set(item, '$.' || ?1, json(?2)) WHERE id = ?3",
            rusqlite::params![field, value.to_string(), id],
        )?;
        if changed == 0 {
            bail!("no listing with id {id}");
        }
        Ok(())
    }

    fn scan_page(&self, req: ScanRequest) -> Result<ScanPage> {
        if req.total_segments == 0 || req.segment >= req.total_segments {
            bail!(
                "segment {} out of range for {} total segments",
                req.segment,
                req.total_segments
            );
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT rowid, id, added, item FROM listings
             WHERE rowid > ?1 AND (rowid % ?2) = ?3
             ORDER BY rowid
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                req.after.unwrap_or(0),
                req.total_segments as i64,
                req.segment as i64,
                req.page_size as i64
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;

        let mut items = Vec::new();
        let mut last_rowid = None;
        for row in rows {
            let (rowid, id, added, item) = row?;
            last_rowid = Some(rowid);
            items.push(StoredListing {
                id,
                added,
                item: serde_json::from_str(&item)
                    .with_context(|| format!("decoding stored item {rowid}"))?,
            });
        }
        let next = if items.len() == req.page_size {
            last_rowid
        } else {
            None
        };
        Ok(ScanPage { items, next })
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: usize = conn.query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(n)
    }

    fn field_count(&self, field: &str) -> Result<usize> {
        let conn = self.conn()?;
        let n: usize = conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE json_extract(item, '$.' || ?1) IS NOT NULL",
            [field],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test.sqlite")).unwrap();
        (dir, store)
    }

    fn listing(id: &str, item: Value) -> StoredListing {
        StoredListing {
            id: id.to_string(),
            added: 1_700_000_000_000,
            item,
        }
    }

    #[test]
    fn put_then_exists_and_get() {
        let (_dir, store) = temp_store();
        let stored = listing("abc", json!({ "id": "abc", "parsed_price": 2895 }));
        assert_eq!(store.put(&stored).unwrap(), PutResult::Created);
        assert!(store.exists("abc").unwrap());
        assert!(!store.exists("def").unwrap());
        assert_eq!(store.get("abc").unwrap().unwrap(), stored);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn second_put_reports_already_exists() {
        let (_dir, store) = temp_store();
        let stored = listing("abc", json!({ "parsed_price": 2895 }));
        assert_eq!(store.put(&stored).unwrap(), PutResult::Created);
        assert_eq!(store.put(&stored).unwrap(), PutResult::AlreadyExists);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn update_field_touches_only_that_field() {
        let (_dir, store) = temp_store();
        let stored = listing(
            "abc",
            json!({ "parsed_housing": "3br - 1200ft2", "parsed_bedrooms": 2.0, "parsed_area": 1200.0 }),
        );
        store.put(&stored).unwrap();
        store
            .update_field("abc", "parsed_bedrooms", &json!(3.0))
            .unwrap();

        let got = store.get("abc").unwrap().unwrap();
        assert_eq!(got.item["parsed_bedrooms"], json!(3.0));
        assert_eq!(got.item["parsed_area"], json!(1200.0));
        assert_eq!(got.item["parsed_housing"], json!("3br - 1200ft2"));
    }

    #[test]
    fn update_field_unknown_id_fails() {
        let (_dir, store) = temp_store();
        assert!(store
            .update_field("missing", "parsed_bedrooms", &json!(1.0))
            .is_err());
    }

    #[test]
    fn float_fields_round_trip_exactly() {
        let (_dir, store) = temp_store();
        let stored = listing("abc", json!({ "parsed_latitude": 37.773972 }));
        store.put(&stored).unwrap();
        let got = store.get("abc").unwrap().unwrap();
        assert_eq!(got.item["parsed_latitude"].as_f64(), Some(37.773972));
    }

    #[test]
    fn segmented_scan_covers_everything_once() {
        let (_dir, store) = temp_store();
        for i in 0..23 {
            store
                .put(&listing(&format!("id{i:02}"), json!({ "n": i })))
                .unwrap();
        }

        for total in [1usize, 2, 3, 5] {
            let mut seen = Vec::new();
            for segment in 0..total {
                let mut after = None;
                loop {
                    let page = store
                        .scan_page(ScanRequest {
                            segment,
                            total_segments: total,
                            page_size: 4,
                            after,
                        })
                        .unwrap();
                    seen.extend(page.items.into_iter().map(|l| l.id));
                    match page.next {
                        Some(cursor) => after = Some(cursor),
                        None => break,
                    }
                }
            }
            seen.sort();
            let expected: Vec<String> = (0..23).map(|i| format!("id{i:02}")).collect();
            assert_eq!(seen, expected, "total_segments={total}");
        }
    }

    #[test]
    fn scan_rejects_bad_segment() {
        let (_dir, store) = temp_store();
        assert!(store
            .scan_page(ScanRequest {
                segment: 2,
                total_segments: 2,
                page_size: 10,
                after: None,
            })
            .is_err());
    }

    #[test]
    fn field_count_ignores_nulls_and_missing() {
        let (_dir, store) = temp_store();
        store
            .put(&listing("a", json!({ "parsed_price": 2895 })))
            .unwrap();
        store
            .put(&listing("b", json!({ "parsed_price": null })))
            .unwrap();
        store.put(&listing("c", json!({}))).unwrap();
        assert_eq!(store.field_count("parsed_price").unwrap(), 1);
        assert_eq!(store.count().unwrap(), 3);
    }
}
