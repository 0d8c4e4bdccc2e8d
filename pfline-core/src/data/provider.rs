//! Data source trait and structured error types.
//!
//! `DataSource` abstracts over where timeseries come from (the REST server, an
//! in-memory table) so the tenant can be tested without a network.

use crate::series::{ShapeError, Series, UnitError};
use crate::tree::TsId;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no timeseries with exact name '{name}' found in portfolio '{portfolio}'")]
    NotFound { portfolio: String, name: String },

    #[error("{count} timeseries with exact name '{name}' found in portfolio '{portfolio}'")]
    Ambiguous {
        portfolio: String,
        name: String,
        count: usize,
    },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("id cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. })
    }
}

/// Whether a range end includes values stamped exactly at that end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Inclusive,
    Exclusive,
}

impl Bound {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bound::Inclusive => "inclusive",
            Bound::Exclusive => "exclusive",
        }
    }

    pub fn includes(&self, ts: DateTime<Tz>, end: DateTime<Tz>) -> bool {
        match self {
            Bound::Inclusive => ts == end,
            Bound::Exclusive => false,
        }
    }
}

/// What to put in place of values the server flags as missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    #[default]
    Zero,
    Nan,
}

impl MissingPolicy {
    pub fn value(&self) -> f64 {
        match self {
            MissingPolicy::Zero => 0.0,
            MissingPolicy::Nan => f64::NAN,
        }
    }
}

/// Options of a single series fetch.
///
/// The default range is exclusive on the left and inclusive on the right,
/// since the server usually stamps values at the end of their period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub left: Bound,
    pub right: Bound,
    pub missing: MissingPolicy,
    /// Let the server recalculate stale values before returning them.
    pub blocking: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            left: Bound::Exclusive,
            right: Bound::Inclusive,
            missing: MissingPolicy::Zero,
            blocking: true,
        }
    }
}

impl FetchOptions {
    pub fn with_missing(mut self, missing: MissingPolicy) -> Self {
        self.missing = missing;
        self
    }

    /// True if `ts` lies within `(left, right]`, with the ends as configured.
    pub fn in_range(&self, ts: DateTime<Tz>, left: DateTime<Tz>, right: DateTime<Tz>) -> bool {
        (ts > left || self.left.includes(ts, left)) && (ts < right || self.right.includes(ts, right))
    }
}

/// Anything that can find and fetch timeseries by portfolio and name.
pub trait DataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Id of the timeseries with exactly this name in the portfolio.
    ///
    /// Fails with `NotFound` if there is none and `Ambiguous` if there are several.
    fn resolve_id(&self, portfolio_id: &str, name: &str) -> Result<TsId, SourceError>;

    /// Values of a timeseries in a time range, as stored on the source.
    fn fetch_series(
        &self,
        id: TsId,
        left: DateTime<Tz>,
        right: DateTime<Tz>,
        options: &FetchOptions,
    ) -> Result<Series, SourceError>;

    /// All timeseries of a portfolio, by name. May be slow.
    fn list_all(&self, portfolio_id: &str) -> Result<BTreeMap<String, TsId>, SourceError>;
}

/// The single id among `hits`, or the matching error.
pub fn unique_match(portfolio_id: &str, name: &str, hits: &[TsId]) -> Result<TsId, SourceError> {
    match hits {
        [id] => Ok(*id),
        [] => Err(SourceError::NotFound {
            portfolio: portfolio_id.to_string(),
            name: name.to_string(),
        }),
        _ => Err(SourceError::Ambiguous {
            portfolio: portfolio_id.to_string(),
            name: name.to_string(),
            count: hits.len(),
        }),
    }
}
