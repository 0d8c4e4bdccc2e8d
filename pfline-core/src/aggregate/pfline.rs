//! Portfolio lines: the result of aggregating a tree of series.

use crate::series::{Aggregation, Dimension, Freq, Series, ShapeError, Unit};
use serde::Serialize;
use std::fmt;

/// Which measures a flat portfolio line carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Volume only (MW).
    Volume,
    /// Price only (Eur/MWh).
    Price,
    /// Revenue only (Eur).
    Revenue,
    /// Volume, price and revenue.
    Complete,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Volume => "volume",
            Kind::Price => "price",
            Kind::Revenue => "revenue",
            Kind::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// A single-level portfolio line. All series are in canonical units and share
/// one index.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatLine {
    Volume { w: Series },
    Price { p: Series },
    Revenue { r: Series },
    /// Revenue equals `w * p * period hours`, except where a zero volume was padded in.
    Complete { w: Series, p: Series, r: Series },
}

impl FlatLine {
    /// Build a line from whichever measures are present. Any two of the three
    /// make a complete line; the third is derived. If all three are given they
    /// must be consistent.
    pub fn from_measures(
        w: Option<Series>,
        p: Option<Series>,
        r: Option<Series>,
    ) -> Result<Self, ShapeError> {
        match (w, p, r) {
            (Some(w), None, None) => Ok(FlatLine::Volume { w }),
            (None, Some(p), None) => Ok(FlatLine::Price { p }),
            (None, None, Some(r)) => Ok(FlatLine::Revenue { r }),
            (Some(w), Some(p), None) => {
                let r = revenue(&w, &p)?;
                Ok(FlatLine::Complete { w, p, r })
            }
            (Some(w), None, Some(r)) => {
                let p = price(&w, &r)?;
                Ok(FlatLine::Complete { w, p, r })
            }
            (None, Some(p), Some(r)) => {
                p.check_aligned(&r)?;
                let hours = r.period_hours()?;
                let values = r
                    .values()
                    .iter()
                    .zip(p.values())
                    .zip(&hours)
                    .map(|((r, p), h)| if *p == 0.0 { 0.0 } else { r / (p * h) })
                    .collect::<Vec<_>>();
                let w = Series::new(r.index().to_vec(), values, Unit::canonical(Dimension::Power))?
                    .with_freq(r.freq());
                Ok(FlatLine::Complete { w, p, r })
            }
            (Some(w), Some(p), Some(r)) => {
                let expected = revenue(&w, &p)?;
                r.check_aligned(&expected)?;
                for ((ts, want), got) in expected.iter().zip(r.values()) {
                    if (want - got).abs() > 1e-6 * want.abs().max(got.abs()).max(1.0) {
                        return Err(ShapeError::InconsistentMeasures(ts.to_rfc3339()));
                    }
                }
                Ok(FlatLine::Complete { w, p, r })
            }
            (None, None, None) => Err(ShapeError::Empty),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            FlatLine::Volume { .. } => Kind::Volume,
            FlatLine::Price { .. } => Kind::Price,
            FlatLine::Revenue { .. } => Kind::Revenue,
            FlatLine::Complete { .. } => Kind::Complete,
        }
    }

    pub fn w(&self) -> Option<&Series> {
        match self {
            FlatLine::Volume { w } | FlatLine::Complete { w, .. } => Some(w),
            _ => None,
        }
    }

    pub fn p(&self) -> Option<&Series> {
        match self {
            FlatLine::Price { p } | FlatLine::Complete { p, .. } => Some(p),
            _ => None,
        }
    }

    pub fn r(&self) -> Option<&Series> {
        match self {
            FlatLine::Revenue { r } | FlatLine::Complete { r, .. } => Some(r),
            _ => None,
        }
    }

    /// Measures present, with their column names.
    pub fn measures(&self) -> Vec<(&'static str, &Series)> {
        [("w", self.w()), ("p", self.p()), ("r", self.r())]
            .into_iter()
            .filter_map(|(name, s)| s.map(|s| (name, s)))
            .collect()
    }

    /// The series that determines the index of this line.
    pub fn first(&self) -> &Series {
        match self {
            FlatLine::Volume { w } | FlatLine::Complete { w, .. } => w,
            FlatLine::Price { p } => p,
            FlatLine::Revenue { r } => r,
        }
    }

    pub fn freq(&self) -> Option<Freq> {
        self.first().freq()
    }

    /// Turn into a complete line, filling missing measures with zeros.
    pub fn into_complete(self) -> Self {
        match self {
            FlatLine::Volume { w } => {
                let p = zeros_like(&w, Dimension::Price);
                let r = zeros_like(&w, Dimension::Currency);
                FlatLine::Complete { w, p, r }
            }
            FlatLine::Price { p } => {
                let w = zeros_like(&p, Dimension::Power);
                let r = zeros_like(&p, Dimension::Currency);
                FlatLine::Complete { w, p, r }
            }
            FlatLine::Revenue { r } => {
                let w = zeros_like(&r, Dimension::Power);
                let p = zeros_like(&r, Dimension::Price);
                FlatLine::Complete { w, p, r }
            }
            complete @ FlatLine::Complete { .. } => complete,
        }
    }

    /// Measure-wise sum of two lines of the same kind.
    pub fn add(&self, other: &FlatLine) -> Result<FlatLine, ShapeError> {
        match (self, other) {
            (FlatLine::Volume { w: a }, FlatLine::Volume { w: b }) => Ok(FlatLine::Volume { w: a.checked_add(b)? }),
            (FlatLine::Price { p: a }, FlatLine::Price { p: b }) => Ok(FlatLine::Price { p: a.checked_add(b)? }),
            (FlatLine::Revenue { r: a }, FlatLine::Revenue { r: b }) => {
                Ok(FlatLine::Revenue { r: a.checked_add(b)? })
            }
            (
                FlatLine::Complete { w: wa, p: pa, r: ra },
                FlatLine::Complete { w: wb, p: pb, r: rb },
            ) => {
                let w = wa.checked_add(wb)?;
                let r = ra.checked_add(rb)?;
                // Where there is no volume, prices add like price-only lines.
                let p = fill_nan(price_or_none(&w, &r)?, pa.checked_add(pb)?)?;
                Ok(FlatLine::Complete { w, p, r })
            }
            (a, b) => Err(ShapeError::KindMismatch {
                left: a.kind(),
                right: b.kind(),
            }),
        }
    }

    /// Resample every measure to `target`.
    ///
    /// Volume is averaged by duration, revenue summed. A price on its own is
    /// averaged by duration; in a complete line it follows from revenue and
    /// volume, or is averaged by duration where the volume is zero.
    pub fn asfreq(&self, target: Freq) -> Result<FlatLine, ShapeError> {
        let source = self.freq().ok_or(ShapeError::UnknownFrequency)?;
        if source == target {
            return Ok(self.clone());
        }
        match self {
            FlatLine::Volume { w } => Ok(FlatLine::Volume {
                w: w.asfreq(target, Aggregation::Mean)?,
            }),
            FlatLine::Price { p } => Ok(FlatLine::Price {
                p: p.asfreq(target, Aggregation::Mean)?,
            }),
            FlatLine::Revenue { r } => Ok(FlatLine::Revenue {
                r: r.asfreq(target, Aggregation::Sum)?,
            }),
            FlatLine::Complete { w, p, r } if source > target => {
                let w = w.asfreq(target, Aggregation::Mean)?;
                let p = p.asfreq(target, Aggregation::Mean)?;
                let r = revenue(&w, &p)?;
                Ok(FlatLine::Complete { w, p, r })
            }
            FlatLine::Complete { w, p, r } => {
                let w2 = w.asfreq(target, Aggregation::Mean)?;
                let r2 = r.asfreq(target, Aggregation::Sum)?;
                let mean_p = p.asfreq(target, Aggregation::Mean)?;
                let p2 = fill_nan(price_or_none(&w2, &r2)?, mean_p)?;
                Ok(FlatLine::Complete { w: w2, p: p2, r: r2 })
            }
        }
    }
}

/// A possibly nested portfolio line.
#[derive(Debug, Clone, PartialEq)]
pub enum PfLine {
    Flat(FlatLine),
    /// Named children in declaration order. All children have the same kind.
    Nested(Vec<(String, PfLine)>),
}

impl PfLine {
    pub fn kind(&self) -> Kind {
        match self {
            PfLine::Flat(flat) => flat.kind(),
            PfLine::Nested(children) => children
                .first()
                .map(|(_, child)| child.kind())
                .unwrap_or(Kind::Complete),
        }
    }

    pub fn child(&self, name: &str) -> Option<&PfLine> {
        match self {
            PfLine::Flat(_) => None,
            PfLine::Nested(children) => children.iter().find(|(n, _)| n == name).map(|(_, c)| c),
        }
    }

    /// Sum over all children, recursively.
    pub fn flatten(&self) -> Result<FlatLine, ShapeError> {
        match self {
            PfLine::Flat(flat) => Ok(flat.clone()),
            PfLine::Nested(children) => {
                let mut iter = children.iter();
                let (_, first) = iter.next().ok_or(ShapeError::Empty)?;
                iter.try_fold(first.flatten()?, |acc, (_, child)| acc.add(&child.flatten()?))
            }
        }
    }

    /// Turn every flat part into a complete line.
    pub fn into_complete(self) -> PfLine {
        match self {
            PfLine::Flat(flat) => PfLine::Flat(flat.into_complete()),
            PfLine::Nested(children) => PfLine::Nested(
                children
                    .into_iter()
                    .map(|(name, child)| (name, child.into_complete()))
                    .collect(),
            ),
        }
    }

    /// Sum of two lines.
    ///
    /// Nested lines add child by child over the union of names (children only
    /// on one side are kept as they are). A nested line added to a flat one is
    /// flattened first.
    pub fn add(&self, other: &PfLine) -> Result<PfLine, ShapeError> {
        match (self, other) {
            (PfLine::Flat(a), PfLine::Flat(b)) => Ok(PfLine::Flat(a.add(b)?)),
            (PfLine::Nested(a), PfLine::Nested(b)) => {
                let mut out: Vec<(String, PfLine)> = Vec::with_capacity(a.len().max(b.len()));
                for (name, child) in a {
                    let summed = match other.child(name) {
                        Some(theirs) => child.add(theirs)?,
                        None => child.clone(),
                    };
                    out.push((name.clone(), summed));
                }
                for (name, child) in b {
                    if self.child(name).is_none() {
                        out.push((name.clone(), child.clone()));
                    }
                }
                Ok(PfLine::Nested(out))
            }
            (PfLine::Nested(_), PfLine::Flat(b)) => Ok(PfLine::Flat(self.flatten()?.add(b)?)),
            (PfLine::Flat(a), PfLine::Nested(_)) => Ok(PfLine::Flat(a.add(&other.flatten()?)?)),
        }
    }
}

fn zeros_like(series: &Series, dimension: Dimension) -> Series {
    series
        .map_values(|_| 0.0)
        .with_unit(Unit::canonical(dimension))
}

/// `derived` with its NaN values taken from `fallback`.
fn fill_nan(derived: Option<Series>, fallback: Series) -> Result<Series, ShapeError> {
    match derived {
        Some(d) => d.zip_with(&fallback, d.unit().clone(), |d, f| if d.is_nan() { f } else { d }),
        None => Ok(fallback),
    }
}

/// `w * p * hours`, in Eur.
fn revenue(w: &Series, p: &Series) -> Result<Series, ShapeError> {
    let hours = w.period_hours()?;
    let wh = w.zip_with(p, Unit::canonical(Dimension::Currency), |w, p| w * p)?;
    Ok(wh.map_indexed(|i, v| v * hours[i]))
}

/// `r / (w * hours)`, in Eur/MWh; zero where the volume is zero.
fn price(w: &Series, r: &Series) -> Result<Series, ShapeError> {
    Ok(match price_or_none(w, r)? {
        Some(derived) => derived.map_values(|v| if v.is_nan() { 0.0 } else { v }),
        None => zeros_like(r, Dimension::Price),
    })
}

/// `r / (w * hours)`, NaN where the volume is zero; `None` if the volume is zero everywhere.
fn price_or_none(w: &Series, r: &Series) -> Result<Option<Series>, ShapeError> {
    w.check_aligned(r)?;
    if w.is_empty() {
        return Ok(Some(r.clone().with_unit(Unit::canonical(Dimension::Price))));
    }
    if w.values().iter().all(|v| *v == 0.0) {
        return Ok(None);
    }
    let hours = w.period_hours()?;
    let energy = w.map_indexed(|i, v| v * hours[i]);
    let p = r.zip_with(&energy, Unit::canonical(Dimension::Price), |r, q| {
        if q == 0.0 {
            f64::NAN
        } else {
            r / q
        }
    })?;
    Ok(Some(p))
}
