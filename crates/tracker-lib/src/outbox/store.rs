//! Storage tiers for undelivered telemetry
//!
//! - `FileStore`: durable JSON file, rewritten atomically via temp-file rename
//! - `MemoryStore`: ephemeral fallback used when the durable tier cannot be opened
//!
//! Both tiers keep records FIFO and make `take_all` a single read-and-clear,
//! so a record is either returned by a drain or still stored, never both.

use crate::error::{TrackerError, TrackerResult};
use crate::models::TelemetryEvent;
use crate::observability::StructuredLogger;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Which storage tier holds a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreTier {
    Durable,
    Ephemeral,
}

impl StoreTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreTier::Durable => "durable",
            StoreTier::Ephemeral => "ephemeral",
        }
    }
}

/// A persisted telemetry event awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub event: TelemetryEvent,
    pub tier: StoreTier,
    /// Unix milliseconds when the record was persisted
    pub queued_at: i64,
}

/// Storage capability the outbox depends on
pub trait OutboxStore: Send + Sync {
    fn tier(&self) -> StoreTier;

    /// Append records at the tail
    fn append(&self, events: Vec<TelemetryEvent>, queued_at: i64) -> TrackerResult<()>;

    /// Remove and return every stored record in FIFO order
    fn take_all(&self) -> TrackerResult<Vec<OutboxRecord>>;

    fn len(&self) -> TrackerResult<usize>;

    fn is_empty(&self) -> TrackerResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn lock<'a, T>(m: &'a Mutex<T>, tier: StoreTier) -> TrackerResult<MutexGuard<'a, T>> {
    m.lock().map_err(|_| {
        TrackerError::StorageUnavailable(format!("{} store lock poisoned", tier.as_str()))
    })
}

fn to_records(events: Vec<TelemetryEvent>, tier: StoreTier, queued_at: i64) -> Vec<OutboxRecord> {
    events
        .into_iter()
        .map(|event| OutboxRecord {
            event,
            tier,
            queued_at,
        })
        .collect()
}

/// In-process queue, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<VecDeque<OutboxRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutboxStore for MemoryStore {
    fn tier(&self) -> StoreTier {
        StoreTier::Ephemeral
    }

    fn append(&self, events: Vec<TelemetryEvent>, queued_at: i64) -> TrackerResult<()> {
        let mut records = lock(&self.records, self.tier())?;
        records.extend(to_records(events, self.tier(), queued_at));
        Ok(())
    }

    fn take_all(&self) -> TrackerResult<Vec<OutboxRecord>> {
        let mut records = lock(&self.records, self.tier())?;
        Ok(records.drain(..).collect())
    }

    fn len(&self) -> TrackerResult<usize> {
        Ok(lock(&self.records, self.tier())?.len())
    }
}

/// Durable queue backed by a JSON file
///
/// The file always holds the full queue. Every mutation writes a temp
/// file and renames it over the original, and the in-memory copy is only
/// updated once the rename succeeded.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: Mutex<VecDeque<OutboxRecord>>,
}

impl FileStore {
    /// Open (or create) the queue file at `path`
    ///
    /// Fails if the directory cannot be created, the file cannot be
    /// written, or existing contents cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let records: VecDeque<OutboxRecord> = if path.exists() {
            let data = std::fs::read(&path)
                .with_context(|| format!("Failed to read outbox file {:?}", path))?;
            if data.is_empty() {
                VecDeque::new()
            } else {
                serde_json::from_slice(&data).context("Failed to deserialize outbox file")?
            }
        } else {
            VecDeque::new()
        };

        // Check writability up front so fallback happens at construction.
        save_records(&path, &records)?;

        info!(path = %path.display(), entries = records.len(), "Opened durable outbox");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the pending records without removing them
    pub fn records(&self) -> TrackerResult<Vec<OutboxRecord>> {
        Ok(lock(&self.records, StoreTier::Durable)?.iter().cloned().collect())
    }
}

fn save_records(path: &Path, records: &VecDeque<OutboxRecord>) -> Result<()> {
    let json = serde_json::to_vec(records).context("Failed to serialize outbox records")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write outbox data")?;
    file.sync_all().context("Failed to sync outbox file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    debug!(path = %path.display(), entries = records.len(), "Outbox persisted");
    Ok(())
}

fn storage_error(e: anyhow::Error) -> TrackerError {
    TrackerError::StorageUnavailable(format!("{e:#}"))
}

impl OutboxStore for FileStore {
    fn tier(&self) -> StoreTier {
        StoreTier::Durable
    }

    fn append(&self, events: Vec<TelemetryEvent>, queued_at: i64) -> TrackerResult<()> {
        let mut records = lock(&self.records, self.tier())?;
        let mut next = records.clone();
        next.extend(to_records(events, self.tier(), queued_at));
        save_records(&self.path, &next).map_err(storage_error)?;
        *records = next;
        Ok(())
    }

    fn take_all(&self) -> TrackerResult<Vec<OutboxRecord>> {
        let mut records = lock(&self.records, self.tier())?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        save_records(&self.path, &VecDeque::new()).map_err(storage_error)?;
        Ok(records.drain(..).collect())
    }

    fn len(&self) -> TrackerResult<usize> {
        Ok(lock(&self.records, self.tier())?.len())
    }
}

/// Open the durable tier at `path`, falling back to memory once.
///
/// `None` selects the ephemeral tier directly.
pub fn open_store(path: Option<&Path>, logger: &StructuredLogger) -> Arc<dyn OutboxStore> {
    match path {
        Some(path) => match FileStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                logger.log_outbox_fallback(&format!("{e:#}"));
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn event(agent: &str) -> TelemetryEvent {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        TelemetryEvent::location(agent, "r1", GeoPoint::new(10.0, 20.0), at)
    }

    #[test]
    fn test_memory_store_fifo_and_take_all_clears() {
        let store = MemoryStore::new();
        store.append(vec![event("a"), event("b")], 1).unwrap();
        store.append(vec![event("c")], 2).unwrap();
        assert_eq!(store.len().unwrap(), 3);

        let taken = store.take_all().unwrap();
        let agents: Vec<_> = taken.iter().map(|r| r.event.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["a", "b", "c"]);
        assert!(taken.iter().all(|r| r.tier == StoreTier::Ephemeral));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outbox.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.append(vec![event("a"), event("b")], 7).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.records().unwrap().len(), 2);
        let taken = reopened.take_all().unwrap();
        assert_eq!(taken[0].event.agent_id, "a");
        assert_eq!(taken[0].queued_at, 7);
        assert_eq!(taken[0].tier, StoreTier::Durable);

        let again = FileStore::open(&path).unwrap();
        assert!(again.is_empty().unwrap());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outbox.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(FileStore::open(&path).is_err());
    }

    #[test]
    fn test_open_store_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory is expected cannot hold the queue.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let path = blocker.join("outbox.json");

        let store = open_store(Some(&path), &StructuredLogger::new("test"));
        assert_eq!(store.tier(), StoreTier::Ephemeral);

        let store = open_store(Some(&dir.path().join("ok.json")), &StructuredLogger::new("test"));
        assert_eq!(store.tier(), StoreTier::Durable);
    }
}
