//! Export of the readings history.
//!
//! This module provides a trait for rendering a store snapshot and the
//! operations that take the snapshot and hand it to a formatter. Currently
//! supports CSV.

pub mod csv;

use crate::reading::LogEntry;
use crate::store::ReadingsStore;
use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub use self::csv::CsvFormatter;

/// Error types for exporting the history.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Rendering failed: {0}")]
    Format(#[from] fmt::Error),
    #[error("Writing export failed: {0}")]
    Io(#[from] io::Error),
}

/// Trait for rendering stored entries into a downloadable document.
pub trait OutputFormatter: Send + Sync {
    /// Render `entries` in order.
    fn format(&self, entries: &[LogEntry]) -> Result<String, ExportError>;

    /// MIME type of the rendered document
    fn content_type(&self) -> &'static str;

    /// Suggested file name for a download
    fn file_name(&self) -> &'static str;
}

/// Render a single snapshot of `store` with `formatter`.
pub fn export(store: &ReadingsStore, formatter: &dyn OutputFormatter) -> Result<String, ExportError> {
    let entries = store.snapshot();
    formatter.format(&entries)
}

/// Render `store` as CSV.
pub fn render_csv(store: &ReadingsStore) -> Result<String, ExportError> {
    export(store, &CsvFormatter)
}

/// Write a CSV export of `store` to `path`.
///
/// The document is written next to `path` first and renamed over it, so a
/// reader never sees a half-written file.
pub async fn write_csv(store: &ReadingsStore, path: &Path) -> Result<usize, ExportError> {
    let document = render_csv(store)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    tokio::fs::write(&tmp, document.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;

    let rows = document.lines().count().saturating_sub(1);
    info!(path = %path.display(), rows, "export written");
    Ok(rows)
}
