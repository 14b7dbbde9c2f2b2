//! In-memory, append-only log of decoded positions.
//!
//! The store grows without bound; there is no eviction. Callers that need a
//! memory ceiling have to truncate externally.

use crate::reading::LogEntry;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe readings log shared between ingestion and export.
///
/// Every call takes the lock once, so an append is never observed half done
/// and a snapshot is a consistent copy rather than a live view.
#[derive(Debug, Default)]
pub struct ReadingsStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl ReadingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock still guards a valid vec: push is the only mutation.
    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry at the end of the log.
    pub fn append(&self, entry: LogEntry) {
        self.lock().push(entry);
    }

    /// Stamp a position with the current UTC time and append it.
    ///
    /// The stamp is taken under the lock and never goes below the previous
    /// entry's, so timestamps are non-decreasing in append order even with
    /// concurrent writers or a wall clock stepping back.
    pub fn record(&self, latitude: f64, longitude: f64) -> LogEntry {
        let mut entries = self.lock();
        let now = Utc::now();
        let received_at = entries
            .last()
            .map_or(now, |last| last.received_at.max(now));
        let entry = LogEntry {
            received_at,
            latitude,
            longitude,
        };
        entries.push(entry);
        entry
    }

    /// Copy of all entries in insertion order.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
