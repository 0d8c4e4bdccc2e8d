//! Structure resolution against document fixtures.

use pfline_core::config::ConfigFormat;
use pfline_core::structure::{ConfigError, LineLookup, LookupError, Structure};
use pfline_core::tree::{Tree, TsRef};
use pfline_core::Freq;
use std::collections::BTreeSet;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load(name: &str) -> Structure {
    Structure::from_file(&fixture(name)).unwrap()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn single_name_line_resolves_to_single_leaf() {
    let s = load("scenario_a.yaml");
    assert_eq!(s.freq(), Freq::Day);
    assert_eq!(s.tz(), chrono_tz::Europe::Berlin);
    assert_eq!(
        s.line_tree("P1", "offtake").unwrap(),
        Tree::Leaf(TsRef::new("P1", "Volume MW"))
    );
}

#[test]
fn absent_correction_removes_line() {
    let s = load("scenario_b.yaml");
    let err = s.name_tree_for_line("P1", "offtake").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(s.lookup_line("P1", "offtake").unwrap(), LineLookup::Absent);
    assert_eq!(s.available_line_ids("P1").unwrap(), set(&["sourced"]));
    assert_eq!(s.available_line_ids("P2").unwrap(), set(&["offtake", "sourced"]));
}

#[test]
fn synthetic_portfolio_lines() {
    let s = load("scenario_c.yaml");
    assert_eq!(s.available_line_ids("ALL").unwrap(), set(&["offtake", "sourced"]));
    // P3 lacks 'offtake' and only P3 has 'extra'.
    assert_eq!(s.available_line_ids("NESTED").unwrap(), set(&["sourced"]));
    assert_eq!(
        s.original_ids_for("NESTED").unwrap(),
        vec!["P1", "P2", "P3", "P1"]
    );
    assert_eq!(
        s.available_portfolio_ids(false),
        set(&["ALL", "NESTED", "P1", "P2", "P3"])
    );
    assert_eq!(s.available_portfolio_ids(true), set(&["P1", "P2", "P3"]));
}

#[test]
fn corrections_expand_templates() {
    let s = load("scenario_c.yaml");
    assert_eq!(
        s.name_tree_for_line("P3", "extra").unwrap(),
        &Tree::LeafList(vec!["Volume MW".to_string(), "Extra MW".to_string()])
    );
    let tree = s.line_tree("P1", "sourced").unwrap();
    assert_eq!(tree.leaf_count(), 3);
    assert_eq!(
        tree.child("spot"),
        Some(&Tree::Leaf(TsRef::new("P1", "Spot MW")))
    );
}

#[test]
fn same_structure_from_three_formats() {
    let yaml = load("scenario_c.yaml");
    for other in ["scenario_c.toml", "scenario_c.json"] {
        let s = load(other);
        assert_eq!(s.line_templates(), yaml.line_templates(), "{other}");
        assert_eq!(s.available_line_ids("P3").unwrap(), yaml.available_line_ids("P3").unwrap());
        assert_eq!(s.original_ids_for("NESTED").unwrap(), yaml.original_ids_for("NESTED").unwrap());
        assert_eq!(s.price_tree("fwc").unwrap(), yaml.price_tree("fwc").unwrap());
    }
}

#[test]
fn price_lookup() {
    let s = load("scenario_c.yaml");
    assert_eq!(s.available_price_ids(), set(&["fwc"]));
    assert_eq!(
        s.price_tree("fwc").unwrap(),
        Tree::Leaf(TsRef::new("PRICES", "Forward curve"))
    );
    assert_eq!(
        s.price_tree("spot").unwrap_err(),
        LookupError::PriceNotFound("spot".into())
    );
}

fn parse(yaml: &str) -> Result<Structure, ConfigError> {
    Structure::parse(yaml, ConfigFormat::Yaml)
}

const HEAD: &str = "freq: D\ntz: Europe/Berlin\npflines: {offtake: Volume MW}\nprices: {}\n";

#[test]
fn missing_freq_is_rejected() {
    let doc = "tz: Europe/Berlin\npflines: {}\nportfolios: {original: [P1]}\nprices: {}\n";
    assert!(matches!(parse(doc), Err(ConfigError::Document(_))));
}

#[test]
fn original_must_be_a_list() {
    let doc = format!("{HEAD}portfolios: {{original: P1}}\n");
    assert!(matches!(parse(&doc), Err(ConfigError::Document(_))));
    let doc = format!("{HEAD}portfolios: {{original: []}}\n");
    assert!(matches!(parse(&doc), Err(ConfigError::NoOriginalPortfolios)));
}

#[test]
fn dangling_nested_synthetic_reference_is_rejected() {
    let doc = format!("{HEAD}portfolios: {{original: [P1], synthetic: {{S: [P1, [P9]]}}}}\n");
    match parse(&doc) {
        Err(ConfigError::UnresolvedReference { synthetic, reference }) => {
            assert_eq!(synthetic, "S");
            assert_eq!(reference, "P9");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn synthetic_reference_must_be_names() {
    let doc = format!("{HEAD}portfolios: {{original: [P1], synthetic: {{S: {{a: P1}}}}}}\n");
    assert!(matches!(parse(&doc), Err(ConfigError::Document(_))));
}

#[test]
fn correction_for_synthetic_portfolio_is_rejected() {
    let doc = format!(
        "{HEAD}portfolios: {{original: [P1], synthetic: {{S: [P1]}}}}\ncorrections: {{S: {{offtake: null}}}}\n"
    );
    assert!(matches!(parse(&doc), Err(ConfigError::CorrectionForUnknownPortfolio(_))));
}

#[test]
fn true_is_not_a_correction() {
    let doc = format!("{HEAD}portfolios: {{original: [P1]}}\ncorrections: {{P1: {{offtake: true}}}}\n");
    assert!(matches!(parse(&doc), Err(ConfigError::InvalidCorrection { .. })));
}

#[test]
fn price_needs_pfid_and_names() {
    let doc = "freq: D\ntz: Europe/Berlin\npflines: {}\nportfolios: {original: [P1]}\nprices: {fwc: {tsnames: x}}\n";
    assert!(matches!(parse(doc), Err(ConfigError::Document(_))));
    let doc = "freq: D\ntz: Europe/Berlin\npflines: {}\nportfolios: {original: [P1]}\nprices: {fwc: {pfid: P, tsnames: 3.5}}\n";
    assert!(matches!(parse(doc), Err(ConfigError::Document(_))));
}

#[test]
fn duplicate_keys_are_rejected() {
    let doc = "freq: D\ntz: Europe/Berlin\npflines: {a: x, a: y}\nportfolios: {original: [P1]}\nprices: {}\n";
    assert!(parse(doc).is_err());
}

#[test]
fn unsupported_extension_is_rejected() {
    let err = Structure::from_file(&fixture("scenario_a.ini")).unwrap_err();
    assert!(err.to_string().contains("unsupported"));
}
