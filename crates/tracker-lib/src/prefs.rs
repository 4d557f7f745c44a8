//! Persisted local state
//!
//! A small keyed JSON store holding:
//! - the last-loaded route and its snapshot, for cold-start redisplay
//! - user toggles (follow, share location, recency window)

use crate::aggregate::DEFAULT_RECENCY_WINDOW;
use crate::models::RouteSnapshot;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LAST_ROUTE_KEY: &str = "lastRouteId";
const SNAPSHOT_KEY_PREFIX: &str = "routeSnapshot:";
const PREFERENCES_KEY: &str = "preferences";

/// User toggles that survive restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub follow: bool,
    pub share_location: bool,
    pub recency_window_secs: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            follow: false,
            share_location: false,
            recency_window_secs: DEFAULT_RECENCY_WINDOW.as_secs(),
        }
    }
}

/// Keyed store of opaque JSON values, persisted to one file
///
/// Without a path the store lives only in memory.
#[derive(Debug)]
pub struct LocalStateStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, serde_json::Value>,
}

impl LocalStateStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    /// Load the store at `path`; unreadable contents start fresh
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load local state, starting fresh");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            entries,
        }
    }

    /// Typed read; missing or mistyped entries read as `None`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key = %key, error = %e, "Ignoring mistyped local state entry");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).context("Failed to serialize local state entry")?;
        self.entries.insert(key.to_string(), value);
        self.save()
    }

    pub fn preferences(&self) -> Preferences {
        self.get(PREFERENCES_KEY).unwrap_or_default()
    }

    pub fn set_preferences(&mut self, prefs: &Preferences) -> Result<()> {
        self.set(PREFERENCES_KEY, prefs)
    }

    pub fn last_route_id(&self) -> Option<String> {
        self.get(LAST_ROUTE_KEY)
    }

    /// Remember `snapshot` as the last-loaded route
    pub fn remember_route(&mut self, snapshot: &RouteSnapshot) -> Result<()> {
        self.entries.insert(
            LAST_ROUTE_KEY.to_string(),
            serde_json::Value::String(snapshot.route_id.clone()),
        );
        self.set(&snapshot_key(&snapshot.route_id), snapshot)
    }

    pub fn snapshot(&self, route_id: &str) -> Option<RouteSnapshot> {
        self.get(&snapshot_key(route_id))
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let json =
            serde_json::to_vec_pretty(&self.entries).context("Failed to serialize local state")?;
        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
        file.write_all(&json).context("Failed to write local state")?;
        file.sync_all().context("Failed to sync local state")?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
        Ok(())
    }
}

fn snapshot_key(route_id: &str) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}{route_id}")
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, serde_json::Value>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read local state {:?}", path))?;
    serde_json::from_slice(&data).context("Failed to deserialize local state")
}
