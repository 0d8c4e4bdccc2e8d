//! Tenant: one structure, one data source, one adjustment chain.
//!
//! Every query runs the same pipeline:
//! - resolve: names to timeseries ids (all of them, before anything is fetched),
//! - fetch + adjust: one series per leaf,
//! - aggregate: the tree into a portfolio line.
//!
//! Any failure aborts the whole query; nothing partial is returned.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use pfline_core::adjustment::AdjustmentChain;
use pfline_core::aggregate::aggregate;
use pfline_core::data::{DataSource, SourceError};
use pfline_core::tree::{DataLeaf, IdLeaf, Tree, TsRef};
use pfline_core::{LookupError, PfLine, ShapeError, Structure};

use crate::fetch::{adjust, fetch_data, fill_frequency, resolve_ids, FetchMode, Window};

/// Errors from a tenant query.
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),
    #[error("empty time range: {left} is not before {right}")]
    EmptyRange { left: String, right: String },
}

impl TenantError {
    /// True for unknown portfolios, lines, prices or timeseries names.
    pub fn is_not_found(&self) -> bool {
        match self {
            TenantError::Lookup(e) => e.is_not_found(),
            TenantError::Source(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Binds a structure to a data source.
pub struct Tenant {
    structure: Arc<Structure>,
    source: Box<dyn DataSource>,
    adjustments: AdjustmentChain,
    mode: FetchMode,
}

impl Tenant {
    /// Tenant with the default adjustments for the structure's timezone.
    pub fn new(structure: Arc<Structure>, source: Box<dyn DataSource>) -> Self {
        let adjustments = AdjustmentChain::default_for(structure.tz());
        Self {
            structure,
            source,
            adjustments,
            mode: FetchMode::default(),
        }
    }

    pub fn with_adjustments(mut self, adjustments: AdjustmentChain) -> Self {
        self.adjustments = adjustments;
        self
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    pub fn adjustments(&self) -> &AdjustmentChain {
        &self.adjustments
    }

    pub fn adjustments_mut(&mut self) -> &mut AdjustmentChain {
        &mut self.adjustments
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.mode
    }

    // ─── Queries ─────────────────────────────────────────────────────

    /// A single timeseries by name, without any structure lookup.
    pub fn arbitrary_series(&self, portfolio_id: &str, name: &str, window: &Window) -> Result<PfLine, TenantError> {
        let trees = self.arbitrary_trees(portfolio_id, name, window)?;
        self.combine(trees)
    }

    /// A line of a portfolio. Synthetic portfolios are the sum over their originals.
    pub fn portfolio_line(&self, portfolio_id: &str, line_id: &str, window: &Window) -> Result<PfLine, TenantError> {
        let trees = self.line_trees(portfolio_id, line_id, window)?;
        self.combine(trees)
    }

    /// A price line.
    pub fn price_series(&self, price_id: &str, window: &Window) -> Result<PfLine, TenantError> {
        let trees = self.price_trees(price_id, window)?;
        self.combine(trees)
    }

    // ─── Series-only variants ────────────────────────────────────────

    /// Fetched series as the source returned them, before adjustment.
    pub fn arbitrary_series_only(
        &self,
        portfolio_id: &str,
        name: &str,
        window: &Window,
    ) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        check_window(window)?;
        let tree = Tree::Leaf(TsRef::new(portfolio_id, name));
        self.fetch_raw(vec![tree], window)
    }

    /// Fetched series of a line, one tree per original constituent, before adjustment.
    pub fn portfolio_line_series_only(
        &self,
        portfolio_id: &str,
        line_id: &str,
        window: &Window,
    ) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        check_window(window)?;
        let names = self.line_names(portfolio_id, line_id)?;
        self.fetch_raw(names, window)
    }

    /// Fetched series of a price, before adjustment.
    pub fn price_series_only(&self, price_id: &str, window: &Window) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        check_window(window)?;
        let names = vec![self.structure.price_tree(price_id)?];
        self.fetch_raw(names, window)
    }

    // ─── Cache ───────────────────────────────────────────────────────

    /// List every timeseries of every fetchable portfolio, so the source can
    /// persist its name-to-id mapping. Slow; returns the count per portfolio.
    pub fn warm_cache(&self) -> Result<BTreeMap<String, usize>, TenantError> {
        let mut counts = BTreeMap::new();
        for portfolio_id in self.structure.fetchable_portfolio_ids() {
            let listed = self.source.list_all(&portfolio_id)?;
            tracing::info!(portfolio = %portfolio_id, count = listed.len(), "listed timeseries");
            counts.insert(portfolio_id, listed.len());
        }
        Ok(counts)
    }

    // ─── Pipeline ────────────────────────────────────────────────────

    fn arbitrary_trees(&self, portfolio_id: &str, name: &str, window: &Window) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        check_window(window)?;
        let tree = Tree::Leaf(TsRef::new(portfolio_id, name));
        self.fetch_adjusted(vec![tree], window)
    }

    fn line_trees(&self, portfolio_id: &str, line_id: &str, window: &Window) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        check_window(window)?;
        let names = self.line_names(portfolio_id, line_id)?;
        self.fetch_adjusted(names, window)
    }

    fn price_trees(&self, price_id: &str, window: &Window) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        check_window(window)?;
        let names = vec![self.structure.price_tree(price_id)?];
        self.fetch_adjusted(names, window)
    }

    /// Name trees of a line for every original constituent of a portfolio.
    fn line_names(&self, portfolio_id: &str, line_id: &str) -> Result<Vec<Tree<TsRef>>, TenantError> {
        let originals = self.structure.original_ids_for(portfolio_id)?;
        let trees = originals
            .iter()
            .map(|original| self.structure.line_tree(original, line_id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trees)
    }

    /// Ids for every tree first, so a bad name fails before any download.
    fn resolve_all(&self, names: Vec<Tree<TsRef>>) -> Result<Vec<Tree<IdLeaf>>, TenantError> {
        let ids = names
            .into_iter()
            .map(|tree| resolve_ids(tree, self.source.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn fetch_raw(&self, names: Vec<Tree<TsRef>>, window: &Window) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        let ids = self.resolve_all(names)?;
        let data = ids
            .into_iter()
            .map(|tree| fetch_data(tree, self.source.as_ref(), window, self.mode))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(data)
    }

    fn fetch_adjusted(&self, names: Vec<Tree<TsRef>>, window: &Window) -> Result<Vec<Tree<DataLeaf>>, TenantError> {
        let raw = self.fetch_raw(names, window)?;
        let fallback = self.structure.freq();
        let adjusted = raw
            .into_iter()
            .map(|tree| fill_frequency(adjust(tree, &self.adjustments)?, window, fallback))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(adjusted)
    }

    /// Aggregate each tree and sum the results.
    fn combine(&self, trees: Vec<Tree<DataLeaf>>) -> Result<PfLine, TenantError> {
        let freq = self.structure.freq();
        let mut total: Option<PfLine> = None;
        for tree in &trees {
            let line = aggregate(tree, freq)?;
            total = Some(match total {
                None => line,
                Some(sum) => sum.add(&line)?,
            });
        }
        total.ok_or_else(|| TenantError::Shape(ShapeError::Empty))
    }
}

fn check_window(window: &Window) -> Result<(), TenantError> {
    if window.left < window.right {
        Ok(())
    } else {
        Err(TenantError::EmptyRange {
            left: window.left.to_rfc3339(),
            right: window.right.to_rfc3339(),
        })
    }
}
