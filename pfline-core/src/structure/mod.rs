//! Structure registry: which portfolios, portfolio lines and prices exist, and
//! which timeseries make them up.
//!
//! A `Structure` is validated completely at construction and is immutable
//! afterwards, so it can be shared (`Arc<Structure>`) by any number of tenants.
//!
//! Invariants established at construction:
//! - line templates are acyclic and fully expanded; no leaf name of an expanded
//!   template is itself a template id,
//! - every synthetic portfolio resolves, through other synthetic ones, to
//!   original portfolios only, without cycles,
//! - every corrected portfolio is original, and every absent marker names an
//!   existing template.

pub mod document;

pub use document::{CorrectionDocument, PortfolioRef, PortfoliosDocument, PriceDocument, StructureDocument};

use crate::config::{self, ConfigFormat, DocumentError};
use crate::series::{Freq, FreqParseError};
use crate::tree::{NameTree, Tree, TsRef};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

/// Construction-time errors. A structure that fails any check is never usable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("invalid freq: {0}")]
    Freq(#[from] FreqParseError),

    #[error("invalid tz '{0}': not an IANA timezone name")]
    Timezone(String),

    #[error("'portfolios.original' must have at least one element")]
    NoOriginalPortfolios,

    #[error("portfolio id '{0}' is declared more than once")]
    DuplicatePortfolio(String),

    #[error("synthetic portfolio '{synthetic}' references unknown portfolio '{reference}'")]
    UnresolvedReference { synthetic: String, reference: String },

    #[error("synthetic portfolios reference each other in a cycle: {0}")]
    SyntheticCycle(String),

    #[error("portfolio line templates reference each other in a cycle: {0}")]
    TemplateCycle(String),

    #[error("template '{template}' is nested and cannot be used inside a list of names")]
    NestedTemplateInList { template: String },

    #[error("corrections given for '{0}', which is not an original portfolio")]
    CorrectionForUnknownPortfolio(String),

    #[error("correction marks line '{line}' absent for '{portfolio}', but no such line template exists")]
    AbsentUnknownLine { portfolio: String, line: String },

    #[error("correction for line '{line}' of '{portfolio}' must be a tree of names, null or false")]
    InvalidCorrection { portfolio: String, line: String },
}

/// Errors of structure queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown portfolio '{0}'")]
    PortfolioNotFound(String),

    #[error("portfolio '{0}' is synthetic; an original portfolio is required here")]
    NotOriginal(String),

    #[error("the portfolio line '{line}' does not exist for portfolio '{portfolio}'")]
    LineNotFound { portfolio: String, line: String },

    #[error("the portfolio line '{line}' is excluded for portfolio '{portfolio}'")]
    LineAbsent { portfolio: String, line: String },

    #[error("unknown price '{0}'")]
    PriceNotFound(String),
}

impl LookupError {
    /// True for every "does not exist" error; false for invalid arguments.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, LookupError::NotOriginal(_))
    }
}

/// Per-portfolio correction of a line.
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    Override(NameTree),
    Absent,
}

/// Outcome of looking up a line for an original portfolio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineLookup<'a> {
    /// The shared template applies.
    Found(&'a NameTree),
    /// The portfolio has its own tree for this line.
    Overridden(&'a NameTree),
    /// The line is excluded for this portfolio.
    Absent,
}

/// A standalone price: a tree of names in one portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub portfolio_id: String,
    pub names: NameTree,
}

#[derive(Debug, Clone)]
pub struct Structure {
    freq: Freq,
    tz: Tz,
    lines: BTreeMap<String, NameTree>,
    original: Vec<String>,
    synthetic: BTreeMap<String, PortfolioRef>,
    prices: BTreeMap<String, Price>,
    corrections: BTreeMap<String, BTreeMap<String, Correction>>,
}

impl Structure {
    /// Load and validate a structure file (YAML, TOML or JSON by extension).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_document(config::load_file(path)?)
    }

    /// Parse and validate a structure document.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        Self::from_document(config::parse_str(content, format)?)
    }

    /// Validate a document and expand its templates.
    pub fn from_document(doc: StructureDocument) -> Result<Self, ConfigError> {
        let freq: Freq = doc.freq.parse()?;
        let tz: Tz = doc
            .tz
            .parse()
            .map_err(|_| ConfigError::Timezone(doc.tz.clone()))?;

        // Portfolios.
        let original = doc.portfolios.original;
        if original.is_empty() {
            return Err(ConfigError::NoOriginalPortfolios);
        }
        let mut seen = BTreeSet::new();
        for pfid in original
            .iter()
            .map(String::as_str)
            .chain(doc.portfolios.synthetic.keys())
        {
            if !seen.insert(pfid.to_string()) {
                return Err(ConfigError::DuplicatePortfolio(pfid.to_string()));
            }
        }
        let synthetic: BTreeMap<String, PortfolioRef> = doc
            .portfolios
            .synthetic
            .0
            .into_iter()
            .collect();
        for (id, summands) in &synthetic {
            check_references(id, summands, &original, &synthetic)?;
        }
        for id in synthetic.keys() {
            check_synthetic_acyclic(id, &synthetic, &mut Vec::new())?;
        }

        // Line templates.
        let raw: BTreeMap<String, NameTree> = doc.pflines.0.into_iter().collect();
        let expander = Expander { templates: &raw };
        let lines = raw
            .keys()
            .map(|id| Ok((id.clone(), expander.template(id, &mut Vec::new())?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        // Corrections.
        let expander = Expander { templates: &lines };
        let mut corrections = BTreeMap::new();
        for (pfid, by_line) in doc.corrections.0 {
            if !original.contains(&pfid) {
                return Err(ConfigError::CorrectionForUnknownPortfolio(pfid));
            }
            let mut resolved = BTreeMap::new();
            for (line, value) in by_line.0 {
                let correction = match value {
                    None | Some(CorrectionDocument::Flag(false)) => {
                        if !lines.contains_key(&line) {
                            return Err(ConfigError::AbsentUnknownLine {
                                portfolio: pfid,
                                line,
                            });
                        }
                        Correction::Absent
                    }
                    Some(CorrectionDocument::Tree(tree)) => {
                        Correction::Override(expander.tree(&tree, &mut Vec::new())?)
                    }
                    Some(CorrectionDocument::Flag(true)) => {
                        return Err(ConfigError::InvalidCorrection {
                            portfolio: pfid,
                            line,
                        })
                    }
                };
                resolved.insert(line, correction);
            }
            corrections.insert(pfid, resolved);
        }

        // Prices.
        let prices = doc
            .prices
            .0
            .into_iter()
            .map(|(id, price)| {
                let names = expander.tree(&price.tsnames, &mut Vec::new())?;
                Ok((
                    id,
                    Price {
                        portfolio_id: price.pfid,
                        names,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        tracing::debug!(
            %freq,
            %tz,
            lines = lines.len(),
            original = original.len(),
            synthetic = synthetic.len(),
            prices = prices.len(),
            "structure validated"
        );

        Ok(Self {
            freq,
            tz,
            lines,
            original,
            synthetic,
            prices,
            corrections,
        })
    }

    /// Shortest frequency of interest; all portfolio lines are returned at this frequency.
    pub fn freq(&self) -> Freq {
        self.freq
    }

    /// Timezone all series are converted into.
    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Expanded line templates by id.
    pub fn line_templates(&self) -> &BTreeMap<String, NameTree> {
        &self.lines
    }

    /// Replace every name that is a line id by its (expanded) template.
    ///
    /// Idempotent: expanding an expanded tree returns it unchanged.
    pub fn expand(&self, tree: &NameTree) -> Result<NameTree, ConfigError> {
        Expander {
            templates: &self.lines,
        }
        .tree(tree, &mut Vec::new())
    }

    /// Portfolio ids: the original ones, plus the synthetic ones unless `original_only`.
    pub fn available_portfolio_ids(&self, original_only: bool) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.original.iter().cloned().collect();
        if !original_only {
            ids.extend(self.synthetic.keys().cloned());
        }
        ids
    }

    pub fn is_original(&self, pfid: &str) -> bool {
        self.original.iter().any(|p| p == pfid)
    }

    pub fn is_synthetic(&self, pfid: &str) -> bool {
        self.synthetic.contains_key(pfid)
    }

    /// Original portfolios whose sum makes up `pfid`, depth-first, duplicates kept.
    pub fn original_ids_for(&self, pfid: &str) -> Result<Vec<String>, LookupError> {
        if self.is_original(pfid) {
            return Ok(vec![pfid.to_string()]);
        }
        let summands = self
            .synthetic
            .get(pfid)
            .ok_or_else(|| LookupError::PortfolioNotFound(pfid.to_string()))?;
        let mut out = Vec::new();
        self.flatten_ref(summands, &mut out)?;
        Ok(out)
    }

    fn flatten_ref(&self, reference: &PortfolioRef, out: &mut Vec<String>) -> Result<(), LookupError> {
        match reference {
            PortfolioRef::One(id) => out.extend(self.original_ids_for(id)?),
            PortfolioRef::Many(refs) => {
                for r in refs {
                    self.flatten_ref(r, out)?;
                }
            }
        }
        Ok(())
    }

    /// Three-way lookup of a line for an original portfolio.
    pub fn lookup_line(&self, pfid: &str, line: &str) -> Result<LineLookup<'_>, LookupError> {
        self.require_original(pfid)?;
        match self.corrections.get(pfid).and_then(|c| c.get(line)) {
            Some(Correction::Absent) => Ok(LineLookup::Absent),
            Some(Correction::Override(tree)) => Ok(LineLookup::Overridden(tree)),
            None => self
                .lines
                .get(line)
                .map(LineLookup::Found)
                .ok_or_else(|| LookupError::LineNotFound {
                    portfolio: pfid.to_string(),
                    line: line.to_string(),
                }),
        }
    }

    /// Tree of names making up `line` for the original portfolio `pfid`.
    pub fn name_tree_for_line(&self, pfid: &str, line: &str) -> Result<&NameTree, LookupError> {
        match self.lookup_line(pfid, line)? {
            LineLookup::Found(tree) | LineLookup::Overridden(tree) => Ok(tree),
            LineLookup::Absent => Err(LookupError::LineAbsent {
                portfolio: pfid.to_string(),
                line: line.to_string(),
            }),
        }
    }

    /// Timeseries that must be fetched to get `line` for the original portfolio `pfid`.
    pub fn line_tree(&self, pfid: &str, line: &str) -> Result<Tree<TsRef>, LookupError> {
        Ok(self.name_tree_for_line(pfid, line)?.for_portfolio(pfid))
    }

    pub fn price(&self, price_id: &str) -> Result<&Price, LookupError> {
        self.prices
            .get(price_id)
            .ok_or_else(|| LookupError::PriceNotFound(price_id.to_string()))
    }

    /// Portfolio and tree of names of a price.
    pub fn name_tree_for_price(&self, price_id: &str) -> Result<(&str, &NameTree), LookupError> {
        let price = self.price(price_id)?;
        Ok((price.portfolio_id.as_str(), &price.names))
    }

    /// Timeseries that must be fetched to get a price.
    pub fn price_tree(&self, price_id: &str) -> Result<Tree<TsRef>, LookupError> {
        let price = self.price(price_id)?;
        Ok(price.names.for_portfolio(&price.portfolio_id))
    }

    /// Line ids available for a portfolio.
    ///
    /// For an original portfolio: all templates, minus absent corrections, plus
    /// overriding corrections. For a synthetic portfolio: only the lines available
    /// in every one of its original summands.
    pub fn available_line_ids(&self, pfid: &str) -> Result<BTreeSet<String>, LookupError> {
        if self.is_original(pfid) {
            let mut ids: BTreeSet<String> = self.lines.keys().cloned().collect();
            for (line, correction) in self.corrections.get(pfid).into_iter().flatten() {
                match correction {
                    Correction::Absent => {
                        ids.remove(line);
                    }
                    Correction::Override(_) => {
                        ids.insert(line.clone());
                    }
                }
            }
            return Ok(ids);
        }
        let originals = self.original_ids_for(pfid)?;
        let mut sets = originals.iter().map(|id| self.available_line_ids(id));
        let first = match sets.next() {
            Some(set) => set?,
            None => return Ok(BTreeSet::new()),
        };
        sets.try_fold(first, |acc, set| {
            let set = set?;
            Ok(acc.intersection(&set).cloned().collect())
        })
    }

    pub fn available_price_ids(&self) -> BTreeSet<String> {
        self.prices.keys().cloned().collect()
    }

    /// Portfolios whose timeseries may be fetched: originals plus those holding prices.
    pub fn fetchable_portfolio_ids(&self) -> BTreeSet<String> {
        let mut ids = self.available_portfolio_ids(true);
        ids.extend(self.prices.values().map(|p| p.portfolio_id.clone()));
        ids
    }

    fn require_original(&self, pfid: &str) -> Result<(), LookupError> {
        if self.is_original(pfid) {
            Ok(())
        } else if self.is_synthetic(pfid) {
            Err(LookupError::NotOriginal(pfid.to_string()))
        } else {
            Err(LookupError::PortfolioNotFound(pfid.to_string()))
        }
    }
}

/// Substitutes template ids by their templates.
struct Expander<'a> {
    templates: &'a BTreeMap<String, NameTree>,
}

impl Expander<'_> {
    fn template(&self, id: &str, stack: &mut Vec<String>) -> Result<NameTree, ConfigError> {
        if stack.iter().any(|s| s == id) {
            stack.push(id.to_string());
            return Err(ConfigError::TemplateCycle(stack.join(" -> ")));
        }
        stack.push(id.to_string());
        let expanded = self.tree(&self.templates[id], stack)?;
        stack.pop();
        Ok(expanded)
    }

    fn tree(&self, tree: &NameTree, stack: &mut Vec<String>) -> Result<NameTree, ConfigError> {
        match tree {
            Tree::Leaf(name) if self.templates.contains_key(name) => self.template(name, stack),
            Tree::Leaf(name) => Ok(Tree::Leaf(name.clone())),
            Tree::LeafList(names) => {
                let mut flat = Vec::with_capacity(names.len());
                for name in names {
                    if !self.templates.contains_key(name) {
                        flat.push(name.clone());
                        continue;
                    }
                    match self.template(name, stack)? {
                        Tree::Leaf(n) => flat.push(n),
                        Tree::LeafList(ns) => flat.extend(ns),
                        Tree::Branch(_) => {
                            return Err(ConfigError::NestedTemplateInList {
                                template: name.clone(),
                            })
                        }
                    }
                }
                Ok(Tree::LeafList(flat))
            }
            Tree::Branch(children) => Ok(Tree::Branch(
                children
                    .iter()
                    .map(|(name, child)| Ok((name.clone(), self.tree(child, stack)?)))
                    .collect::<Result<_, ConfigError>>()?,
            )),
        }
    }
}

fn check_references(
    synthetic_id: &str,
    reference: &PortfolioRef,
    original: &[String],
    synthetic: &BTreeMap<String, PortfolioRef>,
) -> Result<(), ConfigError> {
    match reference {
        PortfolioRef::One(id) if original.contains(id) || synthetic.contains_key(id) => Ok(()),
        PortfolioRef::One(id) => Err(ConfigError::UnresolvedReference {
            synthetic: synthetic_id.to_string(),
            reference: id.clone(),
        }),
        PortfolioRef::Many(refs) => refs
            .iter()
            .try_for_each(|r| check_references(synthetic_id, r, original, synthetic)),
    }
}

fn check_synthetic_acyclic(
    id: &str,
    synthetic: &BTreeMap<String, PortfolioRef>,
    stack: &mut Vec<String>,
) -> Result<(), ConfigError> {
    if stack.iter().any(|s| s == id) {
        stack.push(id.to_string());
        return Err(ConfigError::SyntheticCycle(stack.join(" -> ")));
    }
    let Some(reference) = synthetic.get(id) else {
        return Ok(());
    };
    stack.push(id.to_string());
    let mut ids = Vec::new();
    collect_ids(reference, &mut ids);
    for child in ids {
        check_synthetic_acyclic(child, synthetic, stack)?;
    }
    stack.pop();
    Ok(())
}

fn collect_ids<'a>(reference: &'a PortfolioRef, out: &mut Vec<&'a str>) {
    match reference {
        PortfolioRef::One(id) => out.push(id),
        PortfolioRef::Many(refs) => refs.iter().for_each(|r| collect_ids(r, out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> NameTree {
        Tree::Leaf(name.to_string())
    }

    fn base() -> StructureDocument {
        StructureDocument::new("15T", "Europe/Berlin", &["P1", "P2"])
            .with_line("offtake", leaf("Volume MW"))
            .with_line("sourced", leaf("Sourced MW"))
    }

    #[test]
    fn single_leaf_line() {
        let s = Structure::from_document(base()).unwrap();
        let tree = s.line_tree("P1", "offtake").unwrap();
        assert_eq!(tree, Tree::Leaf(TsRef::new("P1", "Volume MW")));
    }

    #[test]
    fn absent_correction_hides_line() {
        let s = Structure::from_document(base().with_correction("P1", "offtake", None)).unwrap();
        assert!(matches!(
            s.name_tree_for_line("P1", "offtake"),
            Err(LookupError::LineAbsent { .. })
        ));
        assert!(!s.available_line_ids("P1").unwrap().contains("offtake"));
        assert!(s.available_line_ids("P2").unwrap().contains("offtake"));
    }

    #[test]
    fn override_correction_wins_and_adds_lines() {
        let doc = base()
            .with_correction("P2", "offtake", Some(leaf("Other MW")))
            .with_correction("P2", "extra", Some(leaf("offtake")));
        let s = Structure::from_document(doc).unwrap();
        assert_eq!(
            s.lookup_line("P2", "offtake").unwrap(),
            LineLookup::Overridden(&leaf("Other MW"))
        );
        // Corrections are expanded against the templates.
        assert_eq!(s.name_tree_for_line("P2", "extra").unwrap(), &leaf("Volume MW"));
        assert!(s.available_line_ids("P2").unwrap().contains("extra"));
        assert!(!s.available_line_ids("P1").unwrap().contains("extra"));
    }

    #[test]
    fn line_lookup_requires_original_portfolio() {
        let s = Structure::from_document(base().with_synthetic("ALL", &["P1", "P2"])).unwrap();
        assert_eq!(
            s.line_tree("ALL", "offtake").unwrap_err(),
            LookupError::NotOriginal("ALL".into())
        );
        assert_eq!(
            s.line_tree("NOPE", "offtake").unwrap_err(),
            LookupError::PortfolioNotFound("NOPE".into())
        );
        assert!(matches!(
            s.line_tree("P1", "unknown"),
            Err(LookupError::LineNotFound { .. })
        ));
    }

    #[test]
    fn synthetic_lines_are_intersection() {
        let doc = base()
            .with_synthetic("ALL", &["P1", "P2"])
            .with_correction("P2", "sourced", None);
        let s = Structure::from_document(doc).unwrap();
        let lines = s.available_line_ids("ALL").unwrap();
        assert!(lines.contains("offtake"));
        assert!(!lines.contains("sourced"));
    }

    #[test]
    fn nested_synthetic_flattens_depth_first() {
        let doc = base()
            .with_synthetic("A", &["P2", "P1"])
            .with_synthetic("B", &["A", "P1"]);
        let s = Structure::from_document(doc).unwrap();
        assert_eq!(s.original_ids_for("B").unwrap(), vec!["P2", "P1", "P1"]);
        assert_eq!(s.original_ids_for("P1").unwrap(), vec!["P1"]);
        assert!(s.original_ids_for("C").is_err());
    }

    #[test]
    fn rejects_dangling_synthetic_reference() {
        let doc = base().with_synthetic("ALL", &["P1", "P3"]);
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn rejects_synthetic_cycle() {
        let doc = base().with_synthetic("A", &["B"]).with_synthetic("B", &["A"]);
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::SyntheticCycle(_))
        ));
    }

    #[test]
    fn rejects_correction_for_unknown_portfolio() {
        let doc = base().with_correction("P9", "offtake", Some(leaf("x")));
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::CorrectionForUnknownPortfolio(_))
        ));
    }

    #[test]
    fn rejects_absent_marker_for_unknown_line() {
        let doc = base().with_correction("P1", "nonexistent", None);
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::AbsentUnknownLine { .. })
        ));
    }

    #[test]
    fn rejects_template_cycle() {
        let doc = base()
            .with_line("a", leaf("b"))
            .with_line("b", Tree::Branch(vec![("x".into(), leaf("a"))]));
        let err = Structure::from_document(doc).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateCycle(_)), "{err}");
    }

    #[test]
    fn list_elements_expand_flat_templates() {
        let doc = base().with_line(
            "both",
            Tree::LeafList(vec!["offtake".into(), "Extra MW".into()]),
        );
        let s = Structure::from_document(doc).unwrap();
        assert_eq!(
            s.line_templates()["both"],
            Tree::LeafList(vec!["Volume MW".into(), "Extra MW".into()])
        );
    }

    #[test]
    fn nested_template_inside_list_is_rejected() {
        let doc = base()
            .with_line("nested", Tree::Branch(vec![("a".into(), leaf("x"))]))
            .with_line("list", Tree::LeafList(vec!["nested".into()]));
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::NestedTemplateInList { .. })
        ));
    }

    #[test]
    fn rejects_bad_freq_and_tz() {
        let mut doc = base();
        doc.freq = "W".into();
        assert!(matches!(Structure::from_document(doc), Err(ConfigError::Freq(_))));
        let mut doc = base();
        doc.tz = "Mars/Olympus".into();
        assert!(matches!(Structure::from_document(doc), Err(ConfigError::Timezone(_))));
    }

    #[test]
    fn rejects_empty_and_duplicate_portfolios() {
        let doc = StructureDocument::new("D", "Europe/Berlin", &[]);
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::NoOriginalPortfolios)
        ));
        let doc = base().with_synthetic("P1", &["P2"]);
        assert!(matches!(
            Structure::from_document(doc),
            Err(ConfigError::DuplicatePortfolio(_))
        ));
    }

    #[test]
    fn prices_and_fetchable_portfolios() {
        let doc = base().with_price("fwc", "PRICES", leaf("Forward curve"));
        let s = Structure::from_document(doc).unwrap();
        let (pfid, tree) = s.name_tree_for_price("fwc").unwrap();
        assert_eq!(pfid, "PRICES");
        assert_eq!(tree, &leaf("Forward curve"));
        assert!(s.price_tree("nope").is_err());
        let fetchable: Vec<String> = s.fetchable_portfolio_ids().into_iter().collect();
        assert_eq!(fetchable, vec!["P1", "P2", "PRICES"]);
    }
}
