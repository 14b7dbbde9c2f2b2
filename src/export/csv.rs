//! CSV output formatter.

use crate::export::{ExportError, OutputFormatter};
use crate::reading::LogEntry;
use chrono::SecondsFormat;
use std::fmt::{self, Write};

/// Header row of the export.
pub const CSV_HEADER: &str = "timestamp,latitude,longitude";

/// File name offered for downloads.
pub const CSV_FILE_NAME: &str = "gps_data.csv";

/// MIME type of the export.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Record terminator, as in RFC 4180.
pub const CSV_LINE_ENDING: &str = "\r\n";

/// One data row of the export.
#[derive(Debug)]
pub struct CsvRow<'a>(pub &'a LogEntry);

impl fmt::Display for CsvRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Debug keeps the trailing ".0" on whole numbers and round-trips
        write!(
            f,
            "{},{:?},{:?}",
            self.0
                .received_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            self.0.latitude,
            self.0.longitude
        )
    }
}

/// CSV formatter with columns `timestamp,latitude,longitude`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvFormatter;

impl OutputFormatter for CsvFormatter {
    fn format(&self, entries: &[LogEntry]) -> Result<String, ExportError> {
        let mut out = String::with_capacity(CSV_HEADER.len() + 1 + entries.len() * 64);
        write!(out, "{CSV_HEADER}{CSV_LINE_ENDING}")?;
        for entry in entries {
            write!(out, "{}{CSV_LINE_ENDING}", CsvRow(entry))?;
        }
        Ok(out)
    }

    fn content_type(&self) -> &'static str {
        CSV_CONTENT_TYPE
    }

    fn file_name(&self) -> &'static str {
        CSV_FILE_NAME
    }
}
