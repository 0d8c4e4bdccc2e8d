//! CSV export of portfolio lines and of raw per-leaf series.
//!
//! - **Line**: one row per timestamp; the total measures (`w`, `p`, `r`) first,
//!   then every child measure as `child/grandchild/measure`.
//! - **Leaves**: long format, one row per leaf value, for inspecting what the
//!   source returned before aggregation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use pfline_core::tree::{DataLeaf, Tree};
use pfline_core::{PfLine, Series};

// ─── Portfolio line ─────────────────────────────────────────────────

/// Export a portfolio line as a wide CSV table.
///
/// Timestamps missing from a column are left empty.
pub fn export_line_csv(line: &PfLine) -> Result<String> {
    let total = line.flatten().context("failed to sum portfolio line")?;
    let mut columns: Vec<(String, Series)> = total
        .measures()
        .into_iter()
        .map(|(measure, series)| (measure.to_string(), series.clone()))
        .collect();
    if let PfLine::Nested(children) = line {
        for (name, child) in children {
            collect_columns(child, name, &mut columns);
        }
    }

    let mut rows: BTreeMap<DateTime<Tz>, Vec<Option<f64>>> = BTreeMap::new();
    for (k, (_, series)) in columns.iter().enumerate() {
        for (ts, value) in series.iter() {
            rows.entry(ts).or_insert_with(|| vec![None; columns.len()])[k] = Some(value);
        }
    }

    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["timestamp".to_string()];
    header.extend(columns.iter().map(|(name, _)| name.clone()));
    wtr.write_record(&header)?;
    for (ts, values) in rows {
        let mut record = vec![ts.to_rfc3339()];
        record.extend(values.into_iter().map(|v| v.map(format_value).unwrap_or_default()));
        wtr.write_record(&record)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn collect_columns(line: &PfLine, prefix: &str, out: &mut Vec<(String, Series)>) {
    match line {
        PfLine::Flat(flat) => {
            for (measure, series) in flat.measures() {
                out.push((format!("{prefix}/{measure}"), series.clone()));
            }
        }
        PfLine::Nested(children) => {
            for (name, child) in children {
                collect_columns(child, &format!("{prefix}/{name}"), out);
            }
        }
    }
}

// ─── Raw leaves ─────────────────────────────────────────────────────

/// Export fetched leaf series in long format.
///
/// Columns: tree, path, portfolio_id, name, id, unit, timestamp, value.
/// `tree` is the position of the tree in `trees` (one per original portfolio).
pub fn export_leaves_csv(trees: &[Tree<DataLeaf>]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["tree", "path", "portfolio_id", "name", "id", "unit", "timestamp", "value"])?;
    for (k, tree) in trees.iter().enumerate() {
        let mut leaves = Vec::new();
        collect_leaves(tree, "", &mut leaves);
        for (path, leaf) in leaves {
            for (ts, value) in leaf.series.iter() {
                wtr.write_record([
                    &k.to_string(),
                    &path,
                    &leaf.ts.portfolio_id,
                    &leaf.ts.name,
                    &leaf.id.to_string(),
                    &leaf.series.unit().to_string(),
                    &ts.to_rfc3339(),
                    &format_value(value),
                ])?;
            }
        }
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn collect_leaves<'a>(tree: &'a Tree<DataLeaf>, path: &str, out: &mut Vec<(String, &'a DataLeaf)>) {
    match tree {
        Tree::Leaf(leaf) => out.push((path.to_string(), leaf)),
        Tree::LeafList(leaves) => out.extend(leaves.iter().map(|leaf| (path.to_string(), leaf))),
        Tree::Branch(children) => {
            for (name, child) in children {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}/{name}")
                };
                collect_leaves(child, &child_path, out);
            }
        }
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        format!("{v:.6}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use pfline_core::series::{Dimension, Unit};
    use pfline_core::tree::{TsId, TsRef};
    use pfline_core::FlatLine;

    fn series(values: &[f64], dimension: Dimension) -> Series {
        let start = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let index = (0..values.len() as i64).map(|h| start + TimeDelta::hours(h)).collect();
        Series::new(index, values.to_vec(), Unit::canonical(dimension)).unwrap()
    }

    fn volume(values: &[f64]) -> PfLine {
        PfLine::Flat(FlatLine::from_measures(Some(series(values, Dimension::Power)), None, None).unwrap())
    }

    #[test]
    fn flat_line_has_measure_columns() {
        let csv = export_line_csv(&volume(&[1.0, 2.0])).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "timestamp,w");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",1.000000"));
    }

    #[test]
    fn nested_line_has_total_and_child_columns() {
        let line = PfLine::Nested(vec![
            ("a".into(), volume(&[1.0, 2.0])),
            ("b".into(), PfLine::Nested(vec![("c".into(), volume(&[3.0, 4.0]))])),
        ]);
        let csv = export_line_csv(&line).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "timestamp,w,a/w,b/c/w");
        assert!(csv.lines().nth(1).unwrap().contains(",4.000000,1.000000,3.000000"));
    }

    #[test]
    fn leaves_are_long_format() {
        let leaf = |name: &str, id: i64, values: &[f64]| DataLeaf {
            ts: TsRef::new("P1", name),
            id: TsId(id),
            series: series(values, Dimension::Power),
        };
        let tree = Tree::Branch(vec![
            ("x".into(), Tree::Leaf(leaf("a", 1, &[1.0]))),
            ("y".into(), Tree::LeafList(vec![leaf("b", 2, &[2.0]), leaf("c", 3, &[f64::NAN])])),
        ]);
        let csv = export_leaves_csv(&[tree]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("0,x,P1,a,1,MW,"));
        assert!(lines[3].starts_with("0,y,P1,c,3,MW,"));
        assert!(lines[3].ends_with(",NaN"));
    }
}
