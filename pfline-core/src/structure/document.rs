//! Raw structure document, as written by the user.
//!
//! ```yaml
//! freq: 15T
//! tz: Europe/Berlin
//! pflines:
//!   offtake: Offtake MW
//!   sourced: {forward: Forward MW, spot: [Spot DA MW, Spot ID MW]}
//! portfolios:
//!   original: [PKG, B2B]
//!   synthetic: {ALL: [PKG, B2B]}
//! prices:
//!   fwc: {pfid: PRICES, tsnames: Forward curve}
//! corrections:
//!   B2B: {offtake: null}
//! ```

use crate::tree::{NameTree, OrderedMap};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructureDocument {
    pub freq: String,
    pub tz: String,
    pub pflines: OrderedMap<NameTree>,
    pub portfolios: PortfoliosDocument,
    pub prices: OrderedMap<PriceDocument>,
    #[serde(default)]
    pub corrections: OrderedMap<OrderedMap<Option<CorrectionDocument>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortfoliosDocument {
    pub original: Vec<String>,
    #[serde(default)]
    pub synthetic: OrderedMap<PortfolioRef>,
}

/// Summands of a synthetic portfolio: an id or a (nested) list of ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PortfolioRef {
    One(String),
    Many(Vec<PortfolioRef>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceDocument {
    pub pfid: String,
    pub tsnames: NameTree,
}

/// A correction value. `null` (or `false`, since TOML has no null) marks the line
/// as absent for the portfolio.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CorrectionDocument {
    Tree(NameTree),
    Flag(bool),
}

impl StructureDocument {
    /// Minimal document with the given original portfolios and no lines or prices.
    pub fn new(freq: &str, tz: &str, original: &[&str]) -> Self {
        Self {
            freq: freq.to_string(),
            tz: tz.to_string(),
            pflines: OrderedMap::default(),
            portfolios: PortfoliosDocument {
                original: original.iter().map(|s| s.to_string()).collect(),
                synthetic: OrderedMap::default(),
            },
            prices: OrderedMap::default(),
            corrections: OrderedMap::default(),
        }
    }

    pub fn with_line(mut self, id: &str, tree: NameTree) -> Self {
        self.pflines.insert(id, tree);
        self
    }

    pub fn with_synthetic(mut self, id: &str, summands: &[&str]) -> Self {
        let refs = summands
            .iter()
            .map(|s| PortfolioRef::One(s.to_string()))
            .collect();
        self.portfolios.synthetic.insert(id, PortfolioRef::Many(refs));
        self
    }

    pub fn with_price(mut self, id: &str, pfid: &str, tsnames: NameTree) -> Self {
        self.prices.insert(
            id,
            PriceDocument {
                pfid: pfid.to_string(),
                tsnames,
            },
        );
        self
    }

    /// Add a correction; `None` marks the line as absent for the portfolio.
    pub fn with_correction(mut self, pfid: &str, line: &str, tree: Option<NameTree>) -> Self {
        let mut lines = self
            .corrections
            .get(pfid)
            .cloned()
            .unwrap_or_default();
        lines.insert(line, tree.map(CorrectionDocument::Tree));
        self.corrections.insert(pfid, lines);
        self
    }
}
