//! Bundled example documents.

use crate::config::{self, ConfigFormat, DocumentError};
use crate::data::ApiConfig;
use crate::structure::{ConfigError, Structure};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which of the bundled examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Which {
    #[default]
    Basic,
    Complex,
}

impl FromStr for Which {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Which::Basic),
            "complex" => Ok(Which::Complex),
            other => Err(format!("unknown example '{other}'; expected basic or complex")),
        }
    }
}

impl fmt::Display for Which {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Which::Basic => "basic",
            Which::Complex => "complex",
        })
    }
}

/// Kind of example document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Structure,
    Api,
}

/// YAML source of an example.
pub fn text(document: Document, which: Which) -> &'static str {
    match (document, which) {
        (Document::Structure, Which::Basic) => include_str!("../resources/structure_basic.yaml"),
        (Document::Structure, Which::Complex) => include_str!("../resources/structure_complex.yaml"),
        (Document::Api, Which::Basic) => include_str!("../resources/api_basic.yaml"),
        (Document::Api, Which::Complex) => include_str!("../resources/api_complex.yaml"),
    }
}

pub fn structure(which: Which) -> Result<Structure, ConfigError> {
    Structure::parse(text(Document::Structure, which), ConfigFormat::Yaml)
}

pub fn api(which: Which) -> Result<ApiConfig, DocumentError> {
    config::parse_str(text(Document::Api, which), ConfigFormat::Yaml)
}

/// Write an example to `path`. Never overwrites an existing file.
pub fn write_to(document: Document, which: Which, path: &Path) -> Result<(), DocumentError> {
    if path.exists() {
        return Err(DocumentError::AlreadyExists(path.into()));
    }
    std::fs::write(path, text(document, which)).map_err(|source| DocumentError::Write {
        path: path.into(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_examples_are_valid() {
        for which in [Which::Basic, Which::Complex] {
            structure(which).unwrap();
            api(which).unwrap();
        }
    }

    #[test]
    fn complex_example_resolves_synthetic_portfolios() {
        let s = structure(Which::Complex).unwrap();
        assert_eq!(s.original_ids_for("ALL").unwrap().len(), 4);
        let b2b = s.available_line_ids("B2B").unwrap();
        assert!(!b2b.contains("churn"));
        assert!(b2b.contains("sourced"));
        assert!(s.available_line_ids("ALL").unwrap().contains("offtake"));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("structure.yaml");
        write_to(Document::Structure, Which::Basic, &path).unwrap();
        assert!(matches!(
            write_to(Document::Structure, Which::Basic, &path),
            Err(DocumentError::AlreadyExists(_))
        ));
    }
}
