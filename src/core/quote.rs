//! Quote abstractions and core types

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A price observation as returned by a provider, before it is attributed to
/// a configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceQuote {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// A single source's observation within one aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub source_id: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }
}

/// Fetches a quote for a ticker from one upstream.
///
/// `Ok(None)` means the upstream answered but has no data for the ticker.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quote(&self, ticker: &str) -> Result<Option<SourceQuote>>;
}
