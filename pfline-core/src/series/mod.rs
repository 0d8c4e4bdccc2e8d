//! Timeseries model: timestamp index, values, unit and frequency.

pub mod freq;
pub mod resample;
pub mod unit;

pub use freq::{Freq, FreqParseError};
pub use resample::Aggregation;
pub use unit::{Dimension, Unit, UnitError};

use crate::aggregate::Kind;
use chrono::DateTime;
use chrono_tz::Tz;
use thiserror::Error;

/// Data shape problems: misaligned indices, unknown frequencies, incompatible kinds.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShapeError {
    #[error("index has {index} timestamps but there are {values} values")]
    LengthMismatch { index: usize, values: usize },

    #[error("timestamps are not strictly increasing")]
    UnsortedIndex,

    #[error("series indices are not aligned: {0}")]
    Misaligned(String),

    #[error("cannot combine {left} with {right}")]
    DimensionMismatch { left: Dimension, right: Dimension },

    #[error("frequency of series is unknown; set it with an adjustment")]
    UnknownFrequency,

    #[error("period starting {0} is not completely covered by the data")]
    IncompletePeriod(String),

    #[error("wall-clock time {0} does not exist in the target timezone")]
    NonexistentLocalTime(String),

    #[error("cannot combine a {left} line with a {right} line")]
    KindMismatch { left: Kind, right: Kind },

    #[error("dimensionless series '{0}' cannot be part of a portfolio line")]
    Dimensionless(String),

    #[error("volume, price and revenue are inconsistent at {0}")]
    InconsistentMeasures(String),

    #[error("no series to aggregate")]
    Empty,

    #[error(transparent)]
    Unit(#[from] UnitError),
}

/// A timeseries with left-bound timestamps (after adjustment) and a physical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    index: Vec<DateTime<Tz>>,
    values: Vec<f64>,
    unit: Unit,
    freq: Option<Freq>,
}

impl Series {
    /// Build a series; the index must be strictly increasing and as long as `values`.
    pub fn new(index: Vec<DateTime<Tz>>, values: Vec<f64>, unit: Unit) -> Result<Self, ShapeError> {
        if index.len() != values.len() {
            return Err(ShapeError::LengthMismatch {
                index: index.len(),
                values: values.len(),
            });
        }
        if index.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ShapeError::UnsortedIndex);
        }
        Ok(Self {
            index,
            values,
            unit,
            freq: None,
        })
    }

    pub fn index(&self) -> &[DateTime<Tz>] {
        &self.index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn dimension(&self) -> Dimension {
        self.unit.dimension
    }

    pub fn freq(&self) -> Option<Freq> {
        self.freq
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Tz>, f64)> + '_ {
        self.index.iter().copied().zip(self.values.iter().copied())
    }

    pub fn with_freq(mut self, freq: Option<Freq>) -> Self {
        self.freq = freq;
        self
    }

    /// Timezone of the index, `None` for an empty series.
    pub fn timezone(&self) -> Option<Tz> {
        self.index.first().map(|ts| ts.timezone())
    }

    /// Express the same instants in another timezone.
    pub fn with_timezone(mut self, tz: &Tz) -> Self {
        self.index = self.index.iter().map(|ts| ts.with_timezone(tz)).collect();
        self
    }

    /// Replace the index, keeping values, unit and frequency.
    pub fn with_index(self, index: Vec<DateTime<Tz>>) -> Result<Self, ShapeError> {
        let freq = self.freq;
        Ok(Series::new(index, self.values, self.unit)?.with_freq(freq))
    }

    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            index: self.index.clone(),
            values: self.values.iter().map(|v| f(*v)).collect(),
            unit: self.unit.clone(),
            freq: self.freq,
        }
    }

    /// Map values together with their position.
    pub fn map_indexed(&self, f: impl Fn(usize, f64) -> f64) -> Self {
        Self {
            values: self.values.iter().enumerate().map(|(i, v)| f(i, *v)).collect(),
            ..self.clone()
        }
    }

    /// Relabel the unit without touching the values.
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Same series expressed in the canonical unit of its dimension.
    pub fn to_canonical(&self) -> Self {
        if self.unit.is_canonical() {
            return self.clone();
        }
        let factor = self.unit.factor;
        let mut out = self.map_values(|v| v * factor);
        out.unit = Unit::canonical(self.unit.dimension);
        out
    }

    /// Check that `other` has the same timestamps in the same timezone.
    pub fn check_aligned(&self, other: &Series) -> Result<(), ShapeError> {
        if self.timezone() != other.timezone() {
            return Err(ShapeError::Misaligned(format!(
                "timezones {:?} and {:?}",
                self.timezone(),
                other.timezone()
            )));
        }
        if self.index != other.index {
            return Err(ShapeError::Misaligned(format!(
                "{} timestamps from {:?} vs {} timestamps from {:?}",
                self.len(),
                self.index.first(),
                other.len(),
                other.index.first()
            )));
        }
        Ok(())
    }

    /// Elementwise sum of two aligned series of the same dimension, in canonical units.
    pub fn checked_add(&self, other: &Series) -> Result<Series, ShapeError> {
        if self.dimension() != other.dimension() {
            return Err(ShapeError::DimensionMismatch {
                left: self.dimension(),
                right: other.dimension(),
            });
        }
        self.check_aligned(other)?;
        let left = self.to_canonical();
        let right = other.to_canonical();
        let values = left
            .values
            .iter()
            .zip(&right.values)
            .map(|(a, b)| a + b)
            .collect();
        Ok(Series {
            index: left.index,
            values,
            unit: left.unit,
            freq: self.freq.or(other.freq),
        })
    }

    /// Combine aligned series elementwise with `f`. Unit of the result is `unit`.
    pub fn zip_with(
        &self,
        other: &Series,
        unit: Unit,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Series, ShapeError> {
        self.check_aligned(other)?;
        let values = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| f(*a, *b))
            .collect();
        Ok(Series {
            index: self.index.clone(),
            values,
            unit,
            freq: self.freq.or(other.freq),
        })
    }

    /// Duration in hours of each period, derived from the frequency.
    pub fn period_hours(&self) -> Result<Vec<f64>, ShapeError> {
        let freq = self.freq.ok_or(ShapeError::UnknownFrequency)?;
        self.index
            .iter()
            .map(|ts| {
                freq.period_hours(*ts)
                    .ok_or_else(|| ShapeError::NonexistentLocalTime(ts.to_rfc3339()))
            })
            .collect()
    }
}
