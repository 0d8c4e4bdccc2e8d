//! Physical units of fetched timeseries and the dimension they measure.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Physical dimension of a series. Series are grouped by dimension before summing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Power,
    Energy,
    Currency,
    /// Currency per energy.
    Price,
    Dimensionless,
}

impl Dimension {
    /// Symbol of the unit that values of this dimension are normalised to.
    pub fn canonical_symbol(&self) -> &'static str {
        match self {
            Dimension::Power => "MW",
            Dimension::Energy => "MWh",
            Dimension::Currency => "Eur",
            Dimension::Price => "Eur/MWh",
            Dimension::Dimensionless => "",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Power => "power",
            Dimension::Energy => "energy",
            Dimension::Currency => "currency",
            Dimension::Price => "price",
            Dimension::Dimensionless => "dimensionless",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown measurement unit '{0}'")]
pub struct UnitError(pub String);

/// A parsed unit: its dimension and the factor to the canonical unit of that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub symbol: String,
    pub dimension: Dimension,
    /// Multiply a value in this unit by `factor` to get the canonical unit.
    pub factor: f64,
}

impl Unit {
    /// Parse a unit string as reported by the server, e.g. `MW`, `kWh`, `ct/kWh`.
    pub fn parse(symbol: &str) -> Result<Self, UnitError> {
        let trimmed = symbol.trim();
        let (dimension, factor) = match trimmed.split_once('/') {
            Some((num, den)) => {
                let (num_dim, num_factor) = simple(num).ok_or_else(|| UnitError(symbol.into()))?;
                let (den_dim, den_factor) = simple(den).ok_or_else(|| UnitError(symbol.into()))?;
                if num_dim != Dimension::Currency || den_dim != Dimension::Energy {
                    return Err(UnitError(symbol.into()));
                }
                (Dimension::Price, num_factor / den_factor)
            }
            None => simple(trimmed).ok_or_else(|| UnitError(symbol.into()))?,
        };
        Ok(Self {
            symbol: trimmed.to_string(),
            dimension,
            factor,
        })
    }

    /// The canonical unit of a dimension (factor 1).
    pub fn canonical(dimension: Dimension) -> Self {
        Self {
            symbol: dimension.canonical_symbol().to_string(),
            dimension,
            factor: 1.0,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.factor == 1.0 && self.symbol == self.dimension.canonical_symbol()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

fn simple(symbol: &str) -> Option<(Dimension, f64)> {
    let unit = match symbol.trim().to_lowercase().as_str() {
        "w" => (Dimension::Power, 1e-6),
        "kw" => (Dimension::Power, 1e-3),
        "mw" => (Dimension::Power, 1.0),
        "gw" => (Dimension::Power, 1e3),
        "wh" => (Dimension::Energy, 1e-6),
        "kwh" => (Dimension::Energy, 1e-3),
        "mwh" => (Dimension::Energy, 1.0),
        "gwh" => (Dimension::Energy, 1e3),
        "eur" | "euro" | "€" => (Dimension::Currency, 1.0),
        "ct" | "cent" | "eurocent" => (Dimension::Currency, 0.01),
        "keur" | "teur" => (Dimension::Currency, 1e3),
        "" | "-" => (Dimension::Dimensionless, 1.0),
        "%" => (Dimension::Dimensionless, 0.01),
        _ => return None,
    };
    Some(unit)
}
