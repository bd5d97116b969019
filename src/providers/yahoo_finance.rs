use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::util::{RetryPolicy, fetch_body, http_client};
use crate::core::quote::{QuoteProvider, SourceQuote};

/// Quotes and daily closes from the Yahoo Finance chart API.
pub struct YahooQuoteProvider {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    // `null` alongside an `error` object for unknown symbols
    #[serde(default)]
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(alias = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<IndicatorQuote>,
}

#[derive(Deserialize, Debug)]
struct IndicatorQuote {
    close: Option<Vec<Option<f64>>>,
}

impl YahooQuoteProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(YahooQuoteProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_chart(&self, ticker: &str, range: &str) -> Result<Option<ChartItem>> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&range={}",
            self.base_url,
            urlencoding::encode(ticker),
            urlencoding::encode(range)
        );
        debug!("Requesting chart data from {}", url);

        let Some(body) = fetch_body(&self.client, &url, self.retry).await? else {
            return Ok(None);
        };
        let data: YahooChartResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse chart response for {ticker}"))?;

        Ok(data.chart.result.and_then(|items| items.into_iter().next()))
    }

    /// Daily closes over `range` (Yahoo range syntax, e.g. `1y`, `5y`),
    /// one entry per trading date in ascending order. Empty when the
    /// ticker is unknown.
    #[instrument(name = "YahooDailyCloses", skip(self), fields(ticker = %ticker))]
    pub async fn daily_closes(&self, ticker: &str, range: &str) -> Result<Vec<(NaiveDate, f64)>> {
        let Some(item) = self.fetch_chart(ticker, range).await? else {
            return Ok(Vec::new());
        };

        let timestamps = item.timestamp.unwrap_or_default();
        let closes = item
            .indicators
            .and_then(|inds| inds.quote.into_iter().next())
            .and_then(|q| q.close)
            .unwrap_or_default();

        // Intraday bars for the current session share a date with the
        // previous bar; the later one wins.
        let by_date: BTreeMap<NaiveDate, f64> = timestamps
            .iter()
            .zip(closes)
            .filter_map(|(ts, close)| {
                let date = DateTime::from_timestamp(*ts, 0)?.date_naive();
                close.filter(|c| c.is_finite() && *c > 0.0).map(|c| (date, c))
            })
            .collect();

        debug!(bars = by_date.len(), "Extracted daily closes");
        Ok(by_date.into_iter().collect())
    }
}

#[async_trait]
impl QuoteProvider for YahooQuoteProvider {
    #[instrument(name = "YahooQuoteFetch", skip(self), fields(ticker = %ticker))]
    async fn fetch_quote(&self, ticker: &str) -> Result<Option<SourceQuote>> {
        let Some(item) = self.fetch_chart(ticker, "1d").await? else {
            debug!("No chart data for {}", ticker);
            return Ok(None);
        };

        let Some(price) = item.meta.regular_market_price else {
            return Ok(None);
        };
        let observed_at = item
            .meta
            .regular_market_time
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        Ok(Some(SourceQuote { price, observed_at }))
    }
}
