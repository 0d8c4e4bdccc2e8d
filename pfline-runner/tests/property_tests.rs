//! Property tests for tenant queries.
//!
//! 1. A synthetic portfolio's line equals the sum of its originals' lines
//! 2. Parallel and sequential fetching give the same line

use std::sync::Arc;

use chrono::{TimeDelta, TimeZone};
use chrono_tz::Europe::Berlin;
use pfline_core::config::ConfigFormat;
use pfline_core::data::MemorySource;
use pfline_core::series::Unit;
use pfline_core::{Series, Structure};
use pfline_runner::{FetchMode, Tenant, Window};
use proptest::prelude::*;

const STRUCTURE: &str = r#"
freq: h
tz: Europe/Berlin
pflines:
  offtake: [Offtake MW, Extra MW]
portfolios:
  original: [P0, P1, P2]
  synthetic:
    TWO: [P0, P2]
    ALL: [TWO, P1]
prices: {}
"#;

/// Right-bound hourly values in UTC for 2024-01-01 00:00-06:00 Berlin.
fn raw(values: &[f64]) -> Series {
    let first = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let index = (0..values.len() as i64).map(|h| first + TimeDelta::hours(h)).collect();
    Series::new(index, values.to_vec(), Unit::parse("MW").unwrap()).unwrap()
}

fn window() -> Window {
    let left = Berlin.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Window::new(left, left + TimeDelta::hours(6))
}

fn tenant(values: &[Vec<f64>]) -> Tenant {
    let structure = Structure::parse(STRUCTURE, ConfigFormat::Yaml).unwrap();
    let mut source = MemorySource::new();
    for (k, v) in values.iter().enumerate() {
        let pfid = format!("P{}", k % 3);
        let name = if k < 3 { "Offtake MW" } else { "Extra MW" };
        source.insert(&pfid, name, raw(v));
    }
    Tenant::new(Arc::new(structure), Box::new(source))
}

fn arb_values() -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-100.0f64..100.0, 6), 6)
}

fn volume(tenant: &Tenant, pfid: &str) -> Vec<f64> {
    tenant
        .portfolio_line(pfid, "offtake", &window())
        .unwrap()
        .flatten()
        .unwrap()
        .w()
        .unwrap()
        .values()
        .to_vec()
}

proptest! {
    #[test]
    fn synthetic_equals_sum_of_originals(values in arb_values()) {
        let tenant = tenant(&values);
        let parts: Vec<Vec<f64>> = ["P0", "P1", "P2"].iter().map(|p| volume(&tenant, p)).collect();
        let all = volume(&tenant, "ALL");
        for i in 0..6 {
            let expected = parts[0][i] + parts[1][i] + parts[2][i];
            prop_assert!((all[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn parallel_fetch_matches_sequential(values in arb_values()) {
        let sequential = tenant(&values).portfolio_line("ALL", "offtake", &window()).unwrap();
        let parallel = tenant(&values)
            .with_fetch_mode(FetchMode::Parallel)
            .portfolio_line("ALL", "offtake", &window())
            .unwrap();
        prop_assert_eq!(sequential, parallel);
    }
}
