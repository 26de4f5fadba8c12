//! Per-upload timing ledger, retained for a bounded window.
//!
//! One ordered sequence of records per object key; a key can accumulate
//! several records across re-uploads and variant regenerations. Expiry is
//! time-based on the whole key's sequence (refreshed on every append), not
//! per record. Diagnostics only, never correctness-critical.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Timing and size observations for one completed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadMetrics {
    /// Variant derivation time in milliseconds
    pub processing_ms: u64,
    /// Storage put time in milliseconds, retries included
    pub upload_ms: u64,
    /// End-to-end time in milliseconds
    pub total_ms: u64,
    /// Processed buffer size in bytes
    pub size_bytes: u64,
    /// Variant name
    pub variant: String,
}

struct LedgerEntry {
    records: Vec<UploadMetrics>,
    refreshed_at: Instant,
}

/// In-process ledger of upload metrics, keyed by object key.
pub struct MetricsLedger {
    retention: Duration,
    entries: RwLock<HashMap<String, LedgerEntry>>,
}

impl MetricsLedger {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Append a record to `key`'s sequence and refresh its retention
    /// deadline. A sequence that already aged out is restarted rather than
    /// extended.
    pub fn record(&self, key: &str, record: UploadMetrics) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_insert_with(|| LedgerEntry {
            records: Vec::new(),
            refreshed_at: now,
        });

        if now.duration_since(entry.refreshed_at) >= self.retention {
            entry.records.clear();
        }
        entry.records.push(record);
        entry.refreshed_at = now;
    }

    /// Snapshot of every sequence still inside the retention window.
    pub fn snapshot(&self) -> HashMap<String, Vec<UploadMetrics>> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| now.duration_since(entry.refreshed_at) < self.retention);

        entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.records.clone()))
            .collect()
    }

    /// Drop `key`'s sequence, if any.
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}
