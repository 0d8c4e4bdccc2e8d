//! Resolution phases of a tree: names to ids, ids to data, data to adjusted data.
//!
//! Each phase consumes one tree and produces the next; nothing is filled in
//! place. Leaves are visited in declaration order (depth first).

use chrono::DateTime;
use chrono_tz::Tz;
use pfline_core::adjustment::{AdjustmentChain, LeafContext};
use pfline_core::data::{DataSource, FetchOptions, SourceError};
use pfline_core::tree::{DataLeaf, IdLeaf, Tree, TsRef};
use pfline_core::{Freq, ShapeError};
use rayon::prelude::*;

/// How leaves of a tree are fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// One leaf after the other, in declaration order.
    #[default]
    Sequential,
    /// All leaves of a tree at once on the rayon pool.
    Parallel,
}

/// Half-open delivery window and fetch options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub left: DateTime<Tz>,
    pub right: DateTime<Tz>,
    pub options: FetchOptions,
}

impl Window {
    pub fn new(left: DateTime<Tz>, right: DateTime<Tz>) -> Self {
        Self {
            left,
            right,
            options: FetchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }
}

/// Look up the id of every leaf. Stops at the first failure.
pub fn resolve_ids(tree: Tree<TsRef>, source: &dyn DataSource) -> Result<Tree<IdLeaf>, SourceError> {
    tree.try_map(|ts| {
        let id = source.resolve_id(&ts.portfolio_id, &ts.name)?;
        Ok(IdLeaf { ts, id })
    })
}

/// Fetch the series of every leaf.
pub fn fetch_data(
    tree: Tree<IdLeaf>,
    source: &dyn DataSource,
    window: &Window,
    mode: FetchMode,
) -> Result<Tree<DataLeaf>, SourceError> {
    match mode {
        FetchMode::Sequential => tree.try_map(|leaf| fetch_leaf(leaf, source, window)),
        FetchMode::Parallel => {
            let leaves: Vec<IdLeaf> = tree.leaves().into_iter().cloned().collect();
            let fetched = leaves
                .into_par_iter()
                .map(|leaf| fetch_leaf(leaf, source, window))
                .collect::<Result<Vec<_>, _>>()?;
            let mut fetched = fetched.into_iter();
            // Same depth-first order as `leaves()`, so every leaf gets its own data.
            tree.try_map(|leaf| {
                fetched.next().ok_or_else(|| SourceError::NotFound {
                    portfolio: leaf.ts.portfolio_id.clone(),
                    name: leaf.ts.name.clone(),
                })
            })
        }
    }
}

fn fetch_leaf(leaf: IdLeaf, source: &dyn DataSource, window: &Window) -> Result<DataLeaf, SourceError> {
    tracing::info!(
        portfolio = %leaf.ts.portfolio_id,
        id = %leaf.id,
        name = %leaf.ts.name,
        left = %window.left,
        right = %window.right,
        "fetching series"
    );
    let series = source.fetch_series(leaf.id, window.left, window.right, &window.options)?;
    Ok(DataLeaf {
        ts: leaf.ts,
        id: leaf.id,
        series,
    })
}

/// Run every leaf's series through the adjustment chain.
pub fn adjust(tree: Tree<DataLeaf>, chain: &AdjustmentChain) -> Result<Tree<DataLeaf>, ShapeError> {
    tree.try_map(|leaf| {
        let DataLeaf { ts, id, series } = leaf;
        let context = LeafContext {
            id,
            portfolio_id: &ts.portfolio_id,
            name: &ts.name,
        };
        let series = chain.apply(series, &context)?;
        Ok(DataLeaf { ts, id, series })
    })
}

/// Give a frequency to leaves whose index is too short to infer one from.
///
/// A single value that covers the whole window gets the frequency whose one
/// period spans the window; a value stamped at the window's right end is moved
/// to its left end. An empty series gets `fallback`. Anything else is left as
/// it is and fails later in aggregation.
pub fn fill_frequency(tree: Tree<DataLeaf>, window: &Window, fallback: Freq) -> Result<Tree<DataLeaf>, ShapeError> {
    tree.try_map(|leaf| {
        if leaf.series.freq().is_some() {
            return Ok(leaf);
        }
        let DataLeaf { ts, id, series } = leaf;
        let series = match (series.len(), series.index().first().copied()) {
            (0, _) => series.with_freq(Some(fallback)),
            (1, Some(single)) => {
                let tz = single.timezone();
                let left = window.left.with_timezone(&tz);
                let right = window.right.with_timezone(&tz);
                let start = if single == right { left } else { single };
                match single_period(left, right) {
                    Some(freq) if start == left => {
                        tracing::debug!(%id, %freq, "frequency taken from the window");
                        series.with_index(vec![start])?.with_freq(Some(freq))
                    }
                    _ => series,
                }
            }
            _ => series,
        };
        Ok(DataLeaf { ts, id, series })
    })
}

fn single_period(left: DateTime<Tz>, right: DateTime<Tz>) -> Option<Freq> {
    Freq::ALL
        .into_iter()
        .find(|freq| freq.floor(left) == Some(left) && freq.advance(left) == Some(right))
}
