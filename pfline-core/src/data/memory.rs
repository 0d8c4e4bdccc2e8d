//! In-memory data source for tests and offline use.

use super::provider::{unique_match, DataSource, FetchOptions, SourceError};
use crate::series::{Freq, Series};
use crate::tree::{TsId, TsRef};
use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// A fixed table of timeseries. Names need not be unique within a portfolio.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Vec<(TsRef, TsId, Series)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timeseries; ids are handed out in insertion order, starting at 1.
    pub fn insert(&mut self, portfolio_id: &str, name: &str, series: Series) -> TsId {
        let id = TsId(self.entries.len() as i64 + 1);
        self.entries.push((TsRef::new(portfolio_id, name), id, series));
        id
    }

    pub fn with_series(mut self, portfolio_id: &str, name: &str, series: Series) -> Self {
        self.insert(portfolio_id, name, series);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn resolve_id(&self, portfolio_id: &str, name: &str) -> Result<TsId, SourceError> {
        let hits: Vec<TsId> = self
            .entries
            .iter()
            .filter(|(ts, _, _)| ts.portfolio_id == portfolio_id && ts.name == name)
            .map(|(_, id, _)| *id)
            .collect();
        unique_match(portfolio_id, name, &hits)
    }

    fn fetch_series(
        &self,
        id: TsId,
        left: DateTime<Tz>,
        right: DateTime<Tz>,
        options: &FetchOptions,
    ) -> Result<Series, SourceError> {
        let (ts, _, series) = self
            .entries
            .iter()
            .find(|(_, candidate, _)| *candidate == id)
            .ok_or_else(|| SourceError::NotFound {
                portfolio: String::new(),
                name: format!("id {id}"),
            })?;
        tracing::trace!(%ts, %id, "serving series from memory");
        let (index, values): (Vec<_>, Vec<_>) = series
            .iter()
            .filter(|(t, _)| options.in_range(*t, left, right))
            .map(|(t, v)| (t, if v.is_nan() { options.missing.value() } else { v }))
            .unzip();
        let freq = Freq::infer(&index);
        Ok(Series::new(index, values, series.unit().clone())?.with_freq(freq))
    }

    fn list_all(&self, portfolio_id: &str) -> Result<BTreeMap<String, TsId>, SourceError> {
        Ok(self
            .entries
            .iter()
            .filter(|(ts, _, _)| ts.portfolio_id == portfolio_id)
            .map(|(ts, id, _)| (ts.name.clone(), *id))
            .collect())
    }
}
