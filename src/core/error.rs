//! Error taxonomy for the return calculator and the quote aggregator.

use thiserror::Error;

/// Caller-input contract violations on the return calculator.
///
/// These are never patched with a default value: a wrong return is worse than
/// no return.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("equity must be positive, got {equity}")]
    NonPositiveEquity { equity: f64 },

    #[error("{field} must not be negative, got {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    #[error("leverage ratio must be at least 1.0, got {ratio}")]
    InvalidLeverage { ratio: f64 },

    #[error("total portfolio equity must be positive, got {equity}")]
    NonPositiveTotalEquity { equity: f64 },
}

/// A single source failed to produce a quote.
///
/// Recoverable: recorded against the source and excluded from the sample.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceFetchError {
    #[error("{source_id}: timed out after {timeout_ms}ms")]
    Timeout { source_id: String, timeout_ms: u64 },

    #[error("{source_id}: rate limit would delay the call by {wait_ms}ms")]
    RateLimited { source_id: String, wait_ms: u64 },

    #[error("{source_id}: no data for {ticker}")]
    Missing { source_id: String, ticker: String },

    #[error("{source_id}: {reason}")]
    Failed { source_id: String, reason: String },
}

impl SourceFetchError {
    pub fn source_id(&self) -> &str {
        match self {
            SourceFetchError::Timeout { source_id, .. }
            | SourceFetchError::RateLimited { source_id, .. }
            | SourceFetchError::Missing { source_id, .. }
            | SourceFetchError::Failed { source_id, .. } => source_id,
        }
    }
}

/// Caller-visible failures of a whole aggregation call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("no data available for {ticker} ({} source failures)", failures.len())]
    NoDataAvailable {
        ticker: String,
        failures: Vec<SourceFetchError>,
    },

    #[error("aggregation for {ticker} was cancelled")]
    Cancelled { ticker: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DomainError::NonPositiveEquity { equity: 0.0 };
        assert_eq!(err.to_string(), "equity must be positive, got 0");

        let err = AggregationError::NoDataAvailable {
            ticker: "AAPL".to_string(),
            failures: vec![
                SourceFetchError::Failed {
                    source_id: "yahoo".to_string(),
                    reason: "HTTP error: 500".to_string(),
                },
                SourceFetchError::Missing {
                    source_id: "page".to_string(),
                    ticker: "AAPL".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "no data available for AAPL (2 source failures)"
        );
    }

    #[test]
    fn test_source_id_accessor() {
        let err = SourceFetchError::Timeout {
            source_id: "slow".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.source_id(), "slow");
        assert_eq!(err.to_string(), "slow: timed out after 250ms");
    }
}
