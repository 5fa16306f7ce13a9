mod fetch;
mod fingerprint;
mod ingest;
mod listing;
mod parser;
mod queue;
mod reconcile;
mod retrieve;
mod store;

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use fetch::{Fetched, HttpFetcher, PageFetcher};
use store::{ListingStore, SqliteStore};

const DEFAULT_DB: &str = "data/apthunt.sqlite";

#[derive(Parser)]
#[command(name = "apthunt", about = "Classified-ad listing ingestion pipeline")]
struct Cli {
    /// Path to the listing store
    #[arg(long, default_value = DEFAULT_DB, global = true)]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest envelopes (one JSON object per line; '-' reads stdin)
    Ingest {
        file: String,
        /// Max envelopes to ingest (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long, default_value_t = ingest::DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },
    /// Fetch one listing page and print the extracted fields
    Parse {
        /// Listing URL (omit when using --html)
        url: Option<String>,
        /// Parse a local HTML file instead of fetching
        #[arg(long, conflicts_with = "url")]
        html: Option<String>,
    },
    /// Dump every stored listing as a JSON array
    Export {
        #[arg(short, long, default_value = "4")]
        workers: usize,
        #[arg(long, default_value_t = retrieve::DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<String>,
    },
    /// Recompute a derived field and patch drifted records
    Reconcile {
        #[arg(value_enum)]
        field: reconcile::DerivedField,
        #[arg(short, long, default_value_t = reconcile::DEFAULT_WORKERS)]
        workers: usize,
        #[arg(long, default_value_t = reconcile::DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ingest {
            file,
            limit,
            concurrency,
        } => {
            let raw = read_input(&file)?;
            let mut envelopes = Vec::new();
            let mut rejected = 0usize;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                match ingest::parse_envelope(line) {
                    Ok(envelope) => envelopes.push(envelope),
                    Err(err) => {
                        eprintln!("skipping malformed envelope: {err:#}");
                        rejected += 1;
                    }
                }
            }
            if let Some(limit) = limit {
                envelopes.truncate(limit);
            }
            if envelopes.is_empty() {
                println!("No envelopes to ingest.");
                return Ok(());
            }
            println!("Ingesting {} envelopes...", envelopes.len());

            let store: Arc<dyn ListingStore> = Arc::new(SqliteStore::open(&cli.db)?);
            let coordinator = Arc::new(ingest::Coordinator::new(
                store,
                Arc::new(HttpFetcher::new()),
                Arc::new(queue::WebhookPublisher::from_env()),
            ));
            let stats = ingest::ingest_stream(coordinator, envelopes, concurrency).await?;
            println!(
                "Done: {} ingested, {} duplicates, {} removed, {} failed.",
                stats.ingested, stats.duplicates, stats.removed, stats.failed
            );
            if rejected > 0 {
                println!("Rejected {} malformed envelopes.", rejected);
            }
            Ok(())
        }
        Commands::Parse { url, html } => {
            let removed = |url: &Option<String>| -> anyhow::Result<()> {
                match url {
                    Some(url) => {
                        let envelope = ingest::Envelope {
                            source_url: url.clone(),
                            meta: serde_json::Map::new(),
                        };
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&ingest::removed_response(&envelope))?
                        );
                    }
                    None => println!("post removed"),
                }
                Ok(())
            };
            let page = match (&url, &html) {
                (_, Some(path)) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading {path}"))?,
                (Some(u), None) => match HttpFetcher::new().fetch(u).await? {
                    Fetched::Page(page) => page,
                    Fetched::NotFound => return removed(&url),
                },
                (None, None) => anyhow::bail!("either a URL or --html is required"),
            };
            match parser::parse_listing(&page) {
                Ok(listing) => {
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                    Ok(())
                }
                Err(parser::ParseError::Removed(_)) => removed(&url),
                Err(err) => Err(err.into()),
            }
        }
        Commands::Export {
            workers,
            page_size,
            out,
        } => {
            let store: Arc<dyn ListingStore> = Arc::new(SqliteStore::open(&cli.db)?);
            let snapshot = retrieve::retrieve_all(store, workers, page_size).await?;
            for failure in &snapshot.failures {
                eprintln!(
                    "segment {} incomplete ({} retrieved): {}",
                    failure.segment,
                    failure.partial_items.len(),
                    failure.error
                );
            }
            let items: Vec<&serde_json::Value> =
                snapshot.items.iter().map(|l| &l.item).collect();
            let body = serde_json::to_string_pretty(&items)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, body)
                        .with_context(|| format!("writing {path}"))?;
                    println!("Wrote {} listings to {}", items.len(), path);
                }
                None => println!("{body}"),
            }
            // partial snapshots are still useful; only a total wipeout is fatal
            if !snapshot.failures.is_empty() && snapshot.failures.len() == workers.max(1) {
                anyhow::bail!("all {} segments failed", snapshot.failures.len());
            }
            Ok(())
        }
        Commands::Reconcile {
            field,
            workers,
            page_size,
        } => {
            let store: Arc<dyn ListingStore> = Arc::new(SqliteStore::open(&cli.db)?);
            let counts = reconcile::reconcile(store, field, workers, page_size).await?;
            counts.print();
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&cli.db)?;
            println!("Listings:  {}", store.count()?);
            for field in [
                "parsed_price",
                "parsed_housing",
                "parsed_bedrooms",
                "parsed_area",
                "parsed_latitude",
            ] {
                println!("{:<18} {}", format!("{field}:"), store.field_count(field)?);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn read_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
