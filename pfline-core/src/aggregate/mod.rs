//! Aggregation of fetched series trees into portfolio lines.
//!
//! A leaf or list of leaves becomes a [`FlatLine`]: series are converted to
//! canonical units, energy is turned into power, and series of the same
//! dimension are summed on an identical index. The result is resampled to the
//! structure frequency. A branch becomes a [`PfLine::Nested`] of its
//! aggregated children; if the children have different kinds they are all
//! padded with zeros to complete lines.

pub mod pfline;

pub use pfline::{FlatLine, Kind, PfLine};

use crate::series::{Dimension, Freq, Series, ShapeError, Unit};
use crate::tree::{DataLeaf, Tree};
use std::collections::BTreeSet;

/// Aggregate a tree of fetched (and adjusted) series at frequency `freq`.
pub fn aggregate(tree: &Tree<DataLeaf>, freq: Freq) -> Result<PfLine, ShapeError> {
    match tree {
        Tree::Leaf(leaf) => Ok(PfLine::Flat(flat_line(&[leaf], freq)?)),
        Tree::LeafList(leaves) => {
            let leaves: Vec<&DataLeaf> = leaves.iter().collect();
            Ok(PfLine::Flat(flat_line(&leaves, freq)?))
        }
        Tree::Branch(children) => {
            if children.is_empty() {
                return Err(ShapeError::Empty);
            }
            let lines = children
                .iter()
                .map(|(name, child)| Ok((name.clone(), aggregate(child, freq)?)))
                .collect::<Result<Vec<_>, ShapeError>>()?;
            Ok(PfLine::Nested(reconcile(lines)))
        }
    }
}

/// Sum the leaves per measure and resample to `freq`.
fn flat_line(leaves: &[&DataLeaf], freq: Freq) -> Result<FlatLine, ShapeError> {
    let mut w: Option<Series> = None;
    let mut p: Option<Series> = None;
    let mut r: Option<Series> = None;
    for leaf in leaves {
        let series = leaf.series.to_canonical();
        let (slot, series) = match series.dimension() {
            Dimension::Power => (&mut w, series),
            Dimension::Energy => (&mut w, energy_to_power(&series)?),
            Dimension::Price => (&mut p, series),
            Dimension::Currency => (&mut r, series),
            Dimension::Dimensionless => return Err(ShapeError::Dimensionless(leaf.ts.to_string())),
        };
        *slot = Some(match slot.take() {
            Some(acc) => acc.checked_add(&series)?,
            None => series,
        });
    }
    FlatLine::from_measures(w, p, r)?.asfreq(freq)
}

fn energy_to_power(series: &Series) -> Result<Series, ShapeError> {
    let hours = series.period_hours()?;
    Ok(series
        .map_indexed(|i, v| v / hours[i])
        .with_unit(Unit::canonical(Dimension::Power)))
}

/// Make sibling lines kind-compatible.
fn reconcile(children: Vec<(String, PfLine)>) -> Vec<(String, PfLine)> {
    let kinds: BTreeSet<Kind> = children.iter().map(|(_, child)| child.kind()).collect();
    if kinds.len() <= 1 {
        return children;
    }
    tracing::debug!(?kinds, "children differ in kind; padding to complete lines");
    children
        .into_iter()
        .map(|(name, child)| (name, child.into_complete()))
        .collect()
}
