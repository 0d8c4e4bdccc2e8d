//! Sampling frequencies.
//!
//! Sub-daily frequencies step by a fixed duration. Daily and coarser frequencies
//! step in calendar units on the local wall clock, so a day in a DST-observing
//! timezone lasts 23, 24 or 25 hours.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sampling frequency of a series, ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Freq {
    QuarterHour,
    Hour,
    Day,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown frequency '{0}'; expected one of 15T, 15min, H, D, MS, QS, AS, YS")]
pub struct FreqParseError(pub String);

impl Freq {
    /// All frequencies, finest first.
    pub const ALL: [Freq; 6] = [
        Freq::QuarterHour,
        Freq::Hour,
        Freq::Day,
        Freq::Month,
        Freq::Quarter,
        Freq::Year,
    ];

    /// Fixed period length, for sub-daily frequencies only.
    pub fn fixed_duration(&self) -> Option<TimeDelta> {
        match self {
            Freq::QuarterHour => Some(TimeDelta::minutes(15)),
            Freq::Hour => Some(TimeDelta::hours(1)),
            _ => None,
        }
    }

    /// Start of the period following the one starting at `ts`.
    ///
    /// Returns `None` if the next wall-clock start does not exist in the timezone.
    pub fn advance(&self, ts: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let naive = ts.naive_local();
        let next = match self {
            Freq::QuarterHour => return Some(ts + TimeDelta::minutes(15)),
            Freq::Hour => return Some(ts + TimeDelta::hours(1)),
            Freq::Day => naive.checked_add_days(Days::new(1)),
            Freq::Month => naive.checked_add_months(Months::new(1)),
            Freq::Quarter => naive.checked_add_months(Months::new(3)),
            Freq::Year => naive.checked_add_months(Months::new(12)),
        }?;
        localize(&ts.timezone(), next)
    }

    /// Start of the period that contains `ts`.
    pub fn floor(&self, ts: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let sub_minute =
            TimeDelta::seconds(ts.second() as i64) + TimeDelta::nanoseconds(ts.nanosecond() as i64);
        match self {
            Freq::QuarterHour => {
                Some(ts - TimeDelta::minutes((ts.minute() % 15) as i64) - sub_minute)
            }
            Freq::Hour => Some(ts - TimeDelta::minutes(ts.minute() as i64) - sub_minute),
            Freq::Day => localize(&ts.timezone(), midnight(ts.date_naive())?),
            Freq::Month => {
                let date = NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)?;
                localize(&ts.timezone(), midnight(date)?)
            }
            Freq::Quarter => {
                let month = (ts.month() - 1) / 3 * 3 + 1;
                let date = NaiveDate::from_ymd_opt(ts.year(), month, 1)?;
                localize(&ts.timezone(), midnight(date)?)
            }
            Freq::Year => {
                let date = NaiveDate::from_ymd_opt(ts.year(), 1, 1)?;
                localize(&ts.timezone(), midnight(date)?)
            }
        }
    }

    /// Length in hours of the period starting at `ts`.
    pub fn period_hours(&self, ts: DateTime<Tz>) -> Option<f64> {
        let end = self.advance(ts)?;
        Some((end - ts).num_seconds() as f64 / 3600.0)
    }

    /// Infer the frequency of a sorted index. `None` if fewer than two timestamps
    /// or if the gaps are not consistent with any single frequency.
    pub fn infer(index: &[DateTime<Tz>]) -> Option<Freq> {
        if index.len() < 2 {
            return None;
        }
        Freq::ALL.into_iter().find(|freq| {
            index
                .windows(2)
                .all(|pair| freq.advance(pair[0]) == Some(pair[1]))
        })
    }

    /// Pandas-style frequency code.
    pub fn code(&self) -> &'static str {
        match self {
            Freq::QuarterHour => "15min",
            Freq::Hour => "h",
            Freq::Day => "D",
            Freq::Month => "MS",
            Freq::Quarter => "QS",
            Freq::Year => "YS",
        }
    }
}

impl FromStr for Freq {
    type Err = FreqParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "15T" | "15min" => Ok(Freq::QuarterHour),
            "H" | "h" => Ok(Freq::Hour),
            "D" => Ok(Freq::Day),
            "MS" => Ok(Freq::Month),
            "QS" | "QS-JAN" => Ok(Freq::Quarter),
            "AS" | "YS" | "AS-JAN" | "YS-JAN" => Ok(Freq::Year),
            other => Err(FreqParseError(other.to_string())),
        }
    }
}

impl fmt::Display for Freq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

/// Attach a timezone to a wall-clock time; ambiguous times resolve to the earlier instant.
pub(crate) fn localize(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    fn berlin(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, m, d, h, min, 0).earliest().unwrap()
    }

    #[test]
    fn parses_pandas_codes() {
        assert_eq!("15T".parse::<Freq>().unwrap(), Freq::QuarterHour);
        assert_eq!("15min".parse::<Freq>().unwrap(), Freq::QuarterHour);
        assert_eq!("H".parse::<Freq>().unwrap(), Freq::Hour);
        assert_eq!("MS".parse::<Freq>().unwrap(), Freq::Month);
        assert_eq!("AS".parse::<Freq>().unwrap(), Freq::Year);
        assert!("W".parse::<Freq>().is_err());
    }

    #[test]
    fn ordering_is_fine_to_coarse() {
        assert!(Freq::QuarterHour < Freq::Hour);
        assert!(Freq::Day < Freq::Month);
        assert!(Freq::Quarter < Freq::Year);
    }

    #[test]
    fn dst_days_have_23_and_25_hours() {
        assert_eq!(Freq::Day.period_hours(berlin(2024, 3, 31, 0, 0)), Some(23.0));
        assert_eq!(Freq::Day.period_hours(berlin(2024, 10, 27, 0, 0)), Some(25.0));
        assert_eq!(Freq::Day.period_hours(berlin(2024, 6, 1, 0, 0)), Some(24.0));
    }

    #[test]
    fn floor_to_period_start() {
        let ts = berlin(2024, 5, 17, 13, 47);
        assert_eq!(Freq::QuarterHour.floor(ts), Some(berlin(2024, 5, 17, 13, 45)));
        assert_eq!(Freq::Hour.floor(ts), Some(berlin(2024, 5, 17, 13, 0)));
        assert_eq!(Freq::Day.floor(ts), Some(berlin(2024, 5, 17, 0, 0)));
        assert_eq!(Freq::Month.floor(ts), Some(berlin(2024, 5, 1, 0, 0)));
        assert_eq!(Freq::Quarter.floor(ts), Some(berlin(2024, 4, 1, 0, 0)));
        assert_eq!(Freq::Year.floor(ts), Some(berlin(2024, 1, 1, 0, 0)));
    }

    #[test]
    fn infer_daily_across_dst() {
        let index: Vec<_> = (29..=31)
            .map(|d| berlin(2024, 3, d, 0, 0))
            .chain(std::iter::once(berlin(2024, 4, 1, 0, 0)))
            .collect();
        assert_eq!(Freq::infer(&index), Some(Freq::Day));
    }

    #[test]
    fn infer_rejects_irregular_gaps() {
        let index = vec![
            berlin(2024, 1, 1, 0, 0),
            berlin(2024, 1, 1, 1, 0),
            berlin(2024, 1, 1, 3, 0),
        ];
        assert_eq!(Freq::infer(&index), None);
        assert_eq!(Freq::infer(&index[..1]), None);
    }
}
