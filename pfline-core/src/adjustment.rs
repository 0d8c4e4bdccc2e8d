//! Post-fetch adjustments.
//!
//! Every freshly fetched series passes through an [`AdjustmentChain`] before it
//! is aggregated. Each step is a pure `(series, leaf) -> series` transform; the
//! [`LeafContext`] lets a step special-case a single timeseries.
//!
//! The default chain converts to the structure timezone, infers the frequency
//! and then applies the bound heuristic of [`MakeLeft`]: series whose first two
//! timestamps are at most 2 hours apart are taken to be right-bound and are
//! shifted to left-bound. Servers with other conventions need a custom chain.

use crate::series::{Freq, Series, ShapeError};
use crate::tree::TsId;
use chrono::{LocalResult, TimeDelta, TimeZone};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::fmt;

/// The timeseries an adjustment is being applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafContext<'a> {
    pub id: TsId,
    pub portfolio_id: &'a str,
    pub name: &'a str,
}

/// A single series transform.
pub trait Adjustment: Send + Sync {
    /// Human-readable name, used in logs and `Debug` output.
    fn name(&self) -> &str;

    fn apply(&self, series: Series, leaf: &LeafContext<'_>) -> Result<Series, ShapeError>;
}

// ─── Chain ──────────────────────────────────────────────────────────

/// Ordered adjustments, applied first to last.
pub struct AdjustmentChain {
    steps: Vec<Box<dyn Adjustment>>,
}

impl AdjustmentChain {
    pub fn new(steps: Vec<Box<dyn Adjustment>>) -> Self {
        Self { steps }
    }

    /// Chain without any steps; series pass through untouched.
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Convert to `tz`, infer the frequency, make timestamps left-bound.
    pub fn default_for(tz: Tz) -> Self {
        Self::new(vec![
            Box::new(ConvertToTz(tz)),
            Box::new(InferFrequency),
            Box::new(MakeLeft),
        ])
    }

    pub fn replace(&mut self, steps: Vec<Box<dyn Adjustment>>) {
        self.steps = steps;
    }

    pub fn push_front(&mut self, step: impl Adjustment + 'static) {
        self.steps.insert(0, Box::new(step));
    }

    pub fn push_back(&mut self, step: impl Adjustment + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, series: Series, leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        self.steps
            .iter()
            .try_fold(series, |series, step| step.apply(series, leaf))
    }
}

impl fmt::Debug for AdjustmentChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ─── Default steps ──────────────────────────────────────────────────

/// Express timestamps in the given timezone. Instants are unchanged.
#[derive(Debug, Clone, Copy)]
pub struct ConvertToTz(pub Tz);

impl Adjustment for ConvertToTz {
    fn name(&self) -> &str {
        "convert_to_tz"
    }

    fn apply(&self, series: Series, _leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        Ok(series.with_timezone(&self.0))
    }
}

/// Set the frequency from the index; `None` if the gaps are inconsistent or
/// there are fewer than two timestamps. A tenant fills in the frequency of
/// such short series from the query window afterwards.
#[derive(Debug, Clone, Copy)]
pub struct InferFrequency;

impl Adjustment for InferFrequency {
    fn name(&self) -> &str {
        "infer_frequency"
    }

    fn apply(&self, series: Series, _leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        let freq = Freq::infer(series.index());
        Ok(series.with_freq(freq))
    }
}

/// Shift right-bound timestamps to left-bound.
///
/// Heuristic: if the first two timestamps are at most 2 hours apart the series
/// is assumed to be right-bound and every timestamp moves back by one period.
/// Wider gaps (daily and coarser) are assumed to be left-bound already. Series
/// with fewer than two timestamps are returned unchanged.
#[derive(Debug, Clone, Copy)]
pub struct MakeLeft;

impl MakeLeft {
    const MAX_RIGHT_BOUND_GAP: TimeDelta = TimeDelta::hours(2);
}

impl Adjustment for MakeLeft {
    fn name(&self) -> &str {
        "make_left"
    }

    fn apply(&self, series: Series, _leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        let index = series.index();
        if index.len() < 2 {
            return Ok(series);
        }
        let gap = index[1] - index[0];
        if gap > Self::MAX_RIGHT_BOUND_GAP {
            return Ok(series);
        }
        let step = series.freq().and_then(|f| f.fixed_duration()).unwrap_or(gap);
        let shifted = index.iter().map(|ts| *ts - step).collect();
        series.with_index(shifted)
    }
}

// ─── Extra steps ────────────────────────────────────────────────────

/// Re-read timestamps stored with a fixed UTC offset as wall-clock times in `tz`.
///
/// Servers that store e.g. Berlin local time as "+01:00" all year need this.
/// Wall-clock times that occur twice (end of DST) resolve to the earlier instant
/// first and to the later one once the earlier has been used.
#[derive(Debug, Clone, Copy)]
pub struct FixedToZone {
    pub utc_offset: TimeDelta,
    pub tz: Tz,
}

/// `FixedToZone` from "+01:00" (CET without DST) to Europe/Berlin.
pub fn cet_to_berlin() -> FixedToZone {
    FixedToZone {
        utc_offset: TimeDelta::hours(1),
        tz: chrono_tz::Europe::Berlin,
    }
}

impl Adjustment for FixedToZone {
    fn name(&self) -> &str {
        "fixed_to_zone"
    }

    fn apply(&self, series: Series, _leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        let mut index = Vec::with_capacity(series.len());
        for ts in series.index() {
            let wall = ts.naive_utc() + self.utc_offset;
            let local = match self.tz.from_local_datetime(&wall) {
                LocalResult::Single(t) => t,
                LocalResult::Ambiguous(early, late) => match index.last() {
                    Some(prev) if *prev >= early => late,
                    _ => early,
                },
                LocalResult::None => return Err(ShapeError::NonexistentLocalTime(wall.to_string())),
            };
            index.push(local);
        }
        let freq = series.freq();
        Ok(series.with_index(index)?.with_freq(freq))
    }
}

/// Infer the frequency; fall back to a fixed one if inference fails.
#[derive(Debug, Clone, Copy)]
pub struct SetFrequency(pub Freq);

impl Adjustment for SetFrequency {
    fn name(&self) -> &str {
        "set_frequency"
    }

    fn apply(&self, series: Series, _leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        let freq = Freq::infer(series.index()).unwrap_or(self.0);
        Ok(series.with_freq(Some(freq)))
    }
}

/// Apply `inner` only to the timeseries with the given ids.
pub struct Targeted {
    ids: BTreeSet<TsId>,
    inner: Box<dyn Adjustment>,
}

impl Targeted {
    pub fn new(ids: impl IntoIterator<Item = TsId>, inner: impl Adjustment + 'static) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            inner: Box::new(inner),
        }
    }
}

impl Adjustment for Targeted {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, series: Series, leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        if self.ids.contains(&leaf.id) {
            self.inner.apply(series, leaf)
        } else {
            Ok(series)
        }
    }
}

/// Adjustment from a closure.
pub struct FnAdjustment<F> {
    name: String,
    f: F,
}

pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnAdjustment<F>
where
    F: Fn(Series, &LeafContext<'_>) -> Result<Series, ShapeError> + Send + Sync,
{
    FnAdjustment {
        name: name.into(),
        f,
    }
}

impl<F> Adjustment for FnAdjustment<F>
where
    F: Fn(Series, &LeafContext<'_>) -> Result<Series, ShapeError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, series: Series, leaf: &LeafContext<'_>) -> Result<Series, ShapeError> {
        (self.f)(series, leaf)
    }
}
