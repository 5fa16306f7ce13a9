pub mod derive;
mod page;

pub use page::parse_listing;

use thiserror::Error;

/// Extraction failure modes. `Removed` is an expected terminal state for a
/// page; `MissingSection` means the markup no longer matches the schema and
/// must surface rather than default.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("posting removed: {0}")]
    Removed(String),
    #[error("required section missing: {0}")]
    MissingSection(&'static str),
}
