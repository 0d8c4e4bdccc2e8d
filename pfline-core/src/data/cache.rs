//! Persistent timeseries id cache.
//!
//! Layout: one JSON document `{portfolio_id: {timeseries name: id}}`. The file
//! is read once when opened and rewritten after every update (write to `.tmp`,
//! rename into place).

use super::provider::SourceError;
use crate::tree::TsId;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

type Entries = BTreeMap<String, BTreeMap<String, TsId>>;

#[derive(Debug, Default)]
pub struct IdCache {
    path: Option<PathBuf>,
    entries: Mutex<Entries>,
}

impl IdCache {
    /// Cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or start) the cache file at `path`. A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| SourceError::Cache(format!("failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&content)
                .map_err(|e| SourceError::Cache(format!("failed to parse {}: {e}", path.display())))?
        } else {
            Entries::new()
        };
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cached id; case sensitive.
    pub fn get(&self, portfolio_id: &str, name: &str) -> Option<TsId> {
        self.lock()
            .get(portfolio_id)
            .and_then(|names| names.get(name))
            .copied()
    }

    /// Everything cached for a portfolio.
    pub fn portfolio(&self, portfolio_id: &str) -> BTreeMap<String, TsId> {
        self.lock().get(portfolio_id).cloned().unwrap_or_default()
    }

    /// Number of cached ids over all portfolios.
    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add (or overwrite) ids of a portfolio and persist the cache.
    pub fn insert_all(
        &self,
        portfolio_id: &str,
        ids: impl IntoIterator<Item = (String, TsId)>,
    ) -> Result<(), SourceError> {
        let mut entries = self.lock();
        entries
            .entry(portfolio_id.to_string())
            .or_default()
            .extend(ids);
        self.persist(&entries)
    }

    /// Replace everything cached for a portfolio and persist the cache.
    pub fn replace_portfolio(
        &self,
        portfolio_id: &str,
        ids: impl IntoIterator<Item = (String, TsId)>,
    ) -> Result<(), SourceError> {
        let mut entries = self.lock();
        entries.insert(portfolio_id.to_string(), ids.into_iter().collect());
        self.persist(&entries)
    }

    fn persist(&self, entries: &Entries) -> Result<(), SourceError> {
        match &self.path {
            Some(path) => write_atomic(path, entries),
            None => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_atomic(path: &Path, entries: &Entries) -> Result<(), SourceError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| SourceError::Cache(format!("failed to create {}: {e}", dir.display())))?;
    }
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| SourceError::Cache(format!("failed to serialize cache: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .map_err(|e| SourceError::Cache(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| SourceError::Cache(format!("failed to replace {}: {e}", path.display())))
}
