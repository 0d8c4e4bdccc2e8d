//! Loading declarative documents (structure and api configuration) from YAML, TOML or JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "yaml" | "yml" => Some(Self::Yaml),
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                _ => None,
            })
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
            Self::Json => "JSON",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} already exists; delete it first")]
    AlreadyExists(PathBuf),

    #[error("unsupported document extension: {0} (expected .yaml, .yml, .toml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("invalid {format} document: {message}")]
    Parse { format: ConfigFormat, message: String },

    #[error("cannot serialize {format} document: {message}")]
    Serialize { format: ConfigFormat, message: String },
}

/// Parse a document from a string.
pub fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, DocumentError> {
    let parsed = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| DocumentError::Parse { format, message })
}

/// Read and parse a document, detecting its format from the extension.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, DocumentError> {
    let format =
        ConfigFormat::from_path(path).ok_or_else(|| DocumentError::UnsupportedFormat(path.into()))?;
    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
        path: path.into(),
        source,
    })?;
    parse_str(&content, format)
}

/// Serialize a document to a string.
pub fn to_string<T: Serialize>(value: &T, format: ConfigFormat) -> Result<String, DocumentError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
    };
    rendered.map_err(|message| DocumentError::Serialize { format, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        server: String,
        port: u16,
    }

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_path(Path::new("a.ini")), None);
    }

    #[test]
    fn same_document_in_three_formats() {
        let expected = Sample {
            server: "http://host:8040".into(),
            port: 8040,
        };
        let yaml = "server: http://host:8040\nport: 8040\n";
        let toml = "server = \"http://host:8040\"\nport = 8040\n";
        let json = r#"{"server": "http://host:8040", "port": 8040}"#;
        assert_eq!(parse_str::<Sample>(yaml, ConfigFormat::Yaml).unwrap(), expected);
        assert_eq!(parse_str::<Sample>(toml, ConfigFormat::Toml).unwrap(), expected);
        assert_eq!(parse_str::<Sample>(json, ConfigFormat::Json).unwrap(), expected);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = load_file::<Sample>(Path::new("structure.ini")).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedFormat(_)));
    }
}
