//! Price extraction from upstream response bodies.
//!
//! A page provider runs an ordered [`ParserChain`]; the first parser that
//! yields a positive price wins.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

use crate::core::config::ParserSpec;

pub trait QuoteParser: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn parse(&self, body: &str) -> Option<f64>;
}

/// Parses a human-formatted price such as `$1,234.56`, `1.234,56 €` or
/// ` 98.10 USD`. Returns `None` unless the result is finite and positive.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ','))
        .collect();

    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        // 1.234,56
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        // 1234,56
        (None, Some(comma)) if cleaned.len() - comma == 3 && cleaned.matches(',').count() == 1 => {
            cleaned.replace(',', ".")
        }
        _ => cleaned.replace(',', ""),
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite() && *price > 0.0)
}

#[derive(Debug)]
pub struct JsonPointerParser {
    pointer: String,
}

impl JsonPointerParser {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl QuoteParser for JsonPointerParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, body: &str) -> Option<f64> {
        let document: Value = serde_json::from_str(body).ok()?;
        match document.pointer(&self.pointer)? {
            Value::Number(n) => n.as_f64().filter(|p| p.is_finite() && *p > 0.0),
            Value::String(s) => parse_price(s),
            _ => None,
        }
    }
}

/// Finds the HTML table row whose first cell matches `label`
/// (case-insensitive) and reads the price from cell `column`.
#[derive(Debug)]
pub struct TableParser {
    label: String,
    column: usize,
    row: Regex,
    cell: Regex,
    tag: Regex,
}

impl TableParser {
    pub fn new(label: impl Into<String>, column: usize) -> Result<Self> {
        Ok(Self {
            label: label.into().trim().to_lowercase(),
            column,
            row: Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>")?,
            cell: Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>")?,
            tag: Regex::new(r"<[^>]+>")?,
        })
    }

    fn cells(&self, row: &str) -> Vec<String> {
        self.cell
            .captures_iter(row)
            .map(|c| {
                let inner = c.get(1).map_or("", |m| m.as_str());
                self.tag.replace_all(inner, "").replace("&nbsp;", " ").trim().to_string()
            })
            .collect()
    }
}

impl QuoteParser for TableParser {
    fn name(&self) -> &'static str {
        "table"
    }

    fn parse(&self, body: &str) -> Option<f64> {
        self.row
            .captures_iter(body)
            .filter_map(|row| row.get(1))
            .map(|row| self.cells(row.as_str()))
            .find(|cells| cells.first().is_some_and(|c| c.to_lowercase() == self.label))
            .and_then(|cells| cells.get(self.column).and_then(|c| parse_price(c)))
    }
}

/// Reads the first `attribute="value"` occurrence, e.g. `data-price="101.2"`.
#[derive(Debug)]
pub struct AttributeParser {
    pattern: Regex,
}

impl AttributeParser {
    pub fn new(attribute: &str) -> Result<Self> {
        let pattern = format!(r#"{}\s*=\s*["']([^"']+)["']"#, regex::escape(attribute));
        Ok(Self {
            pattern: Regex::new(&pattern)?,
        })
    }
}

impl QuoteParser for AttributeParser {
    fn name(&self) -> &'static str {
        "attribute"
    }

    fn parse(&self, body: &str) -> Option<f64> {
        self.pattern
            .captures_iter(body)
            .filter_map(|c| c.get(1))
            .find_map(|m| parse_price(m.as_str()))
    }
}

/// Last-resort extraction: the first capture group of a user-supplied
/// pattern, or the whole match when the pattern has no groups.
#[derive(Debug)]
pub struct RegexParser {
    pattern: Regex,
}

impl RegexParser {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl QuoteParser for RegexParser {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn parse(&self, body: &str) -> Option<f64> {
        self.pattern.captures_iter(body).find_map(|c| {
            let m = c.get(1).or_else(|| c.get(0))?;
            parse_price(m.as_str())
        })
    }
}

pub fn build_parser(spec: &ParserSpec) -> Result<Box<dyn QuoteParser>> {
    let parser: Box<dyn QuoteParser> = match spec {
        ParserSpec::Json { pointer } => Box::new(JsonPointerParser::new(pointer.clone())),
        ParserSpec::Table { label, column } => Box::new(TableParser::new(label.clone(), *column)?),
        ParserSpec::Attribute { attribute } => Box::new(
            AttributeParser::new(attribute)
                .with_context(|| format!("Invalid attribute parser '{attribute}'"))?,
        ),
        ParserSpec::Regex { pattern } => Box::new(
            RegexParser::new(pattern).with_context(|| format!("Invalid regex '{pattern}'"))?,
        ),
    };
    Ok(parser)
}

#[derive(Debug, Default)]
pub struct ParserChain {
    parsers: Vec<Box<dyn QuoteParser>>,
}

impl ParserChain {
    pub fn new(parsers: Vec<Box<dyn QuoteParser>>) -> Self {
        Self { parsers }
    }

    pub fn from_specs(specs: &[ParserSpec]) -> Result<Self> {
        let parsers = specs.iter().map(build_parser).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(parsers))
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn parse(&self, body: &str) -> Option<f64> {
        self.parsers.iter().find_map(|parser| {
            let price = parser.parse(body);
            if let Some(price) = price {
                debug!(parser = parser.name(), price, "Parser matched");
            }
            price
        })
    }
}
