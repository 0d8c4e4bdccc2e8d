//! Changing the frequency of a series.
//!
//! Every supported frequency nests into each coarser one, so resampling is
//! always either a pure downsample (many source periods per target period) or
//! a pure upsample (many target periods per source period).

use super::{Freq, Series, ShapeError};
use chrono::DateTime;
use chrono_tz::Tz;

/// How values combine when periods are merged or split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Intensive quantities (power, price): duration-weighted mean when
    /// downsampling, repeated when upsampling.
    Mean,
    /// Extensive quantities (energy, money): summed when downsampling, split
    /// by duration when upsampling.
    Sum,
}

/// One target period of a downsample: its start, its length in hours and the
/// positions of the source values it covers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bucket {
    pub start: DateTime<Tz>,
    pub hours: f64,
    pub members: std::ops::Range<usize>,
}

impl Series {
    /// Resample to `target`. The series frequency must be known.
    pub fn asfreq(&self, target: Freq, how: Aggregation) -> Result<Series, ShapeError> {
        let source = self.freq.ok_or(ShapeError::UnknownFrequency)?;
        if source == target || self.is_empty() {
            return Ok(self.clone().with_freq(Some(target)));
        }
        if source < target {
            let hours = self.period_hours()?;
            let buckets = self.buckets(target)?;
            let values = buckets
                .iter()
                .map(|b| {
                    let sum: f64 = b.members.clone().map(|i| self.values[i] * weight(how, hours[i])).sum();
                    match how {
                        Aggregation::Mean => sum / b.hours,
                        Aggregation::Sum => sum,
                    }
                })
                .collect();
            let index = buckets.into_iter().map(|b| b.start).collect();
            Ok(Series::new(index, values, self.unit.clone())?.with_freq(Some(target)))
        } else {
            let mut index = Vec::new();
            let mut values = Vec::new();
            for (ts, value) in self.iter() {
                let end = source
                    .advance(ts)
                    .ok_or_else(|| ShapeError::NonexistentLocalTime(ts.to_rfc3339()))?;
                if target.floor(ts) != Some(ts) {
                    return Err(ShapeError::Misaligned(format!(
                        "{ts} is not the start of a {target} period"
                    )));
                }
                let total = hours_between(ts, end);
                let mut t = ts;
                while t < end {
                    let next = target
                        .advance(t)
                        .ok_or_else(|| ShapeError::NonexistentLocalTime(t.to_rfc3339()))?;
                    index.push(t);
                    values.push(match how {
                        Aggregation::Mean => value,
                        Aggregation::Sum => value * hours_between(t, next) / total,
                    });
                    t = next;
                }
            }
            Ok(Series::new(index, values, self.unit.clone())?.with_freq(Some(target)))
        }
    }

    /// Group the series into complete periods of the coarser frequency `target`.
    pub(crate) fn buckets(&self, target: Freq) -> Result<Vec<Bucket>, ShapeError> {
        let source = self.freq.ok_or(ShapeError::UnknownFrequency)?;
        let mut buckets: Vec<Bucket> = Vec::new();
        let mut i = 0;
        while i < self.index.len() {
            let first = self.index[i];
            let start = target
                .floor(first)
                .ok_or_else(|| ShapeError::NonexistentLocalTime(first.to_rfc3339()))?;
            let end = target
                .advance(start)
                .ok_or_else(|| ShapeError::NonexistentLocalTime(start.to_rfc3339()))?;
            if first != start {
                return Err(ShapeError::IncompletePeriod(start.to_rfc3339()));
            }
            let mut expected = first;
            let from = i;
            while i < self.index.len() && self.index[i] < end {
                if self.index[i] != expected {
                    return Err(ShapeError::IncompletePeriod(start.to_rfc3339()));
                }
                expected = source
                    .advance(expected)
                    .ok_or_else(|| ShapeError::NonexistentLocalTime(expected.to_rfc3339()))?;
                i += 1;
            }
            if expected != end {
                return Err(ShapeError::IncompletePeriod(start.to_rfc3339()));
            }
            buckets.push(Bucket {
                start,
                hours: hours_between(start, end),
                members: from..i,
            });
        }
        Ok(buckets)
    }
}

fn weight(how: Aggregation, hours: f64) -> f64 {
    match how {
        Aggregation::Mean => hours,
        Aggregation::Sum => 1.0,
    }
}

pub(crate) fn hours_between(start: DateTime<Tz>, end: DateTime<Tz>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Dimension, Unit};
    use chrono::{TimeDelta, TimeZone};
    use chrono_tz::Europe::Berlin;

    fn quarter_hours(day: u32, values: Vec<f64>, dim: Dimension) -> Series {
        let start = Berlin.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
        let index = (0..values.len())
            .map(|i| start + TimeDelta::minutes(15 * i as i64))
            .collect();
        Series::new(index, values, Unit::canonical(dim))
            .unwrap()
            .with_freq(Some(Freq::QuarterHour))
    }

    #[test]
    fn downsample_power_is_mean_and_money_is_sum() {
        let w = quarter_hours(1, vec![1.0, 2.0, 3.0, 6.0], Dimension::Power);
        assert_eq!(w.asfreq(Freq::Hour, Aggregation::Mean).unwrap().values(), &[3.0]);
        let r = quarter_hours(1, vec![1.0, 2.0, 3.0, 6.0], Dimension::Currency);
        assert_eq!(r.asfreq(Freq::Hour, Aggregation::Sum).unwrap().values(), &[12.0]);
    }

    #[test]
    fn incomplete_period_is_an_error() {
        let w = quarter_hours(1, vec![1.0, 2.0, 3.0], Dimension::Power);
        assert!(matches!(
            w.asfreq(Freq::Hour, Aggregation::Mean),
            Err(ShapeError::IncompletePeriod(_))
        ));
    }

    #[test]
    fn dst_day_has_23_hours() {
        // 2024-03-31 is the spring-forward day in Berlin.
        let w = quarter_hours(31, vec![1.0; 92], Dimension::Power);
        let daily = w.asfreq(Freq::Day, Aggregation::Mean).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily.values(), &[1.0]);
        let r = quarter_hours(31, vec![1.0; 92], Dimension::Currency);
        assert_eq!(r.asfreq(Freq::Day, Aggregation::Sum).unwrap().values(), &[92.0]);
    }

    #[test]
    fn upsample_repeats_or_splits() {
        let start = Berlin.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let w = Series::new(vec![start], vec![4.0], Unit::canonical(Dimension::Power))
            .unwrap()
            .with_freq(Some(Freq::Hour));
        let up = w.asfreq(Freq::QuarterHour, Aggregation::Mean).unwrap();
        assert_eq!(up.values(), &[4.0; 4]);
        assert_eq!(up.freq(), Some(Freq::QuarterHour));
        let split = w.asfreq(Freq::QuarterHour, Aggregation::Sum).unwrap();
        assert_eq!(split.values(), &[1.0; 4]);
    }

    #[test]
    fn unknown_frequency_is_an_error() {
        let w = quarter_hours(1, vec![1.0], Dimension::Power).with_freq(None);
        assert_eq!(
            w.asfreq(Freq::Hour, Aggregation::Mean).unwrap_err(),
            ShapeError::UnknownFrequency
        );
    }
}
