use crate::core::aggregator::AggregationPolicy;
use crate::core::error::DomainError;
use crate::core::leverage::Position;
use crate::core::registry::SourceConfig;
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_YAHOO_URL: &str = "https://query1.finance.yahoo.com";

fn default_yahoo_url() -> String {
    DEFAULT_YAHOO_URL.to_string()
}

fn default_column() -> usize {
    1
}

/// How a page provider extracts a price from a response body.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParserSpec {
    /// RFC 6901 pointer into a JSON document, e.g. `/quote/price`.
    Json { pointer: String },
    /// Row whose first cell equals `label`; the price is in cell `column`.
    Table {
        label: String,
        #[serde(default = "default_column")]
        column: usize,
    },
    /// Value of the first `attribute="..."` occurrence.
    Attribute { attribute: String },
    /// First capture group of `pattern`.
    Regex { pattern: String },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSettings {
    Yahoo {
        #[serde(default = "default_yahoo_url")]
        base_url: String,
    },
    Page {
        /// URL template; `{ticker}` is replaced with the requested ticker.
        url: String,
        parsers: Vec<ParserSpec>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceSettings {
    #[serde(flatten)]
    pub source: SourceConfig,
    pub provider: ProviderSettings,
}

fn default_sources() -> Vec<SourceSettings> {
    vec![SourceSettings {
        source: SourceConfig {
            reliability: 90.0,
            ..SourceConfig::new("yahoo", 1)
        },
        provider: ProviderSettings::Yahoo {
            base_url: default_yahoo_url(),
        },
    }]
}

/// A position as written in the config. Either `cost_basis` or `leverage`
/// must be given. Without `current_value` the position is valued at
/// `units × aggregated quote`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PositionConfig {
    pub symbol: String,
    pub equity: f64,
    pub cost_basis: Option<f64>,
    pub leverage: Option<f64>,
    pub current_value: Option<f64>,
    pub units: Option<f64>,
}

impl PositionConfig {
    pub fn needs_quote(&self) -> bool {
        self.current_value.is_none()
    }

    pub fn to_position(&self, current_value: f64) -> Result<Position, DomainError> {
        let position = match (self.cost_basis, self.leverage) {
            (Some(cost_basis), _) => Position::new(self.equity, cost_basis, current_value)?,
            (None, Some(leverage)) => Position::leveraged(self.equity, leverage, current_value)?,
            (None, None) => Position::new(self.equity, self.equity, current_value)?,
        };
        Ok(position.with_symbol(self.symbol.clone()))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Portfolio {
    pub name: String,
    pub positions: Vec<PositionConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceSettings>,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
    /// Enables a short-lived quote cache in front of every source.
    pub cache_ttl_secs: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "atlas", "atlas")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for settings in &self.sources {
            settings.source.validate()?;
            if !names.insert(settings.source.name.as_str()) {
                bail!("duplicate source name '{}'", settings.source.name);
            }
            if let ProviderSettings::Page { url, parsers } = &settings.provider {
                if !url.contains("{ticker}") {
                    bail!(
                        "source '{}': url must contain a {{ticker}} placeholder",
                        settings.source.name
                    );
                }
                if parsers.is_empty() {
                    bail!("source '{}': at least one parser is required", settings.source.name);
                }
            }
        }

        self.aggregation.validate()?;

        for portfolio in &self.portfolios {
            for position in &portfolio.positions {
                if position.cost_basis.is_some() && position.leverage.is_some() {
                    bail!(
                        "{}/{}: give either cost_basis or leverage, not both",
                        portfolio.name,
                        position.symbol
                    );
                }
                if position.current_value.is_none() && position.units.is_none() {
                    bail!(
                        "{}/{}: current_value or units is required",
                        portfolio.name,
                        position.symbol
                    );
                }
            }
        }
        Ok(())
    }
}
