//! Combines quotes from several sources into one price with a confidence
//! score.

use crate::core::confidence::{ConfidenceBreakdown, ConfidencePolicy};
use crate::core::error::{AggregationError, SourceFetchError};
use crate::core::quote::Quote;
use crate::core::registry::{FetchLimits, SourceRegistry};
use crate::core::stats::{self, OutlierCenter};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPolicy {
    pub fetch_timeout_ms: u64,
    /// Calls that would wait longer than this for a rate-limit slot are
    /// rejected as source errors.
    pub max_rate_limit_wait_ms: u64,
    pub outlier_sigma: f64,
    pub outlier_center: OutlierCenter,
    pub confidence: ConfidencePolicy,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5000,
            max_rate_limit_wait_ms: 2000,
            outlier_sigma: 2.0,
            outlier_center: OutlierCenter::default(),
            confidence: ConfidencePolicy::default(),
        }
    }
}

impl AggregationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_ms == 0 {
            bail!("fetch_timeout_ms must be positive");
        }
        if !self.outlier_sigma.is_finite() || self.outlier_sigma <= 0.0 {
            bail!(
                "outlier_sigma must be a positive number, got {}",
                self.outlier_sigma
            );
        }
        self.confidence.validate()
    }

    fn limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_millis(self.fetch_timeout_ms),
            max_rate_limit_wait: Duration::from_millis(self.max_rate_limit_wait_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedQuote {
    pub ticker: String,
    pub final_price: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub sources_used: BTreeSet<String>,
    pub rejected_sources: BTreeSet<String>,
    pub source_prices: BTreeMap<String, f64>,
    pub confidence_score: f64,
    pub confidence: ConfidenceBreakdown,
    /// True when at least two sources contributed a price.
    pub is_aggregated: bool,
    pub aggregated_at: DateTime<Utc>,
}

pub struct MultiSourceQuoteAggregator {
    registry: Arc<SourceRegistry>,
    policy: AggregationPolicy,
}

impl MultiSourceQuoteAggregator {
    pub fn new(registry: Arc<SourceRegistry>, policy: AggregationPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    /// Queries every enabled source concurrently and aggregates the answers.
    ///
    /// Individual source failures are logged and skipped. Only when no source
    /// produced a price does this return `NoDataAvailable`.
    #[instrument(name = "AggregateQuote", skip_all, fields(ticker = %ticker))]
    pub async fn aggregate(&self, ticker: &str) -> Result<AggregatedQuote, AggregationError> {
        let sources = self.registry.enabled_sources();
        debug!("Querying {} enabled sources", sources.len());

        let limits = self.policy.limits();
        let outcomes = join_all(sources.iter().map(|s| s.fetch(ticker, limits))).await;

        let mut quotes = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(quote) => quotes.push(quote),
                Err(e) => failures.push(e),
            }
        }

        self.combine(ticker, quotes, failures, Utc::now())
    }

    /// Like [`aggregate`](Self::aggregate), abandoning outstanding fetches
    /// when `cancel` completes first. Nothing is returned for a cancelled
    /// call.
    pub async fn aggregate_until<F>(
        &self,
        ticker: &str,
        cancel: F,
    ) -> Result<AggregatedQuote, AggregationError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.aggregate(ticker) => result,
            () = cancel => {
                warn!(ticker, "Aggregation cancelled");
                Err(AggregationError::Cancelled { ticker: ticker.to_string() })
            }
        }
    }

    /// Aggregates an already collected sample as of `now`.
    pub fn combine(
        &self,
        ticker: &str,
        quotes: Vec<Quote>,
        failures: Vec<SourceFetchError>,
        now: DateTime<Utc>,
    ) -> Result<AggregatedQuote, AggregationError> {
        let prices: Vec<f64> = quotes.iter().map(|q| q.price).collect();
        let (Some(mean), Some(median), Some(std_dev)) = (
            stats::mean(&prices),
            stats::median(&prices),
            stats::std_dev(&prices),
        ) else {
            warn!(ticker, failures = failures.len(), "No usable quotes");
            return Err(AggregationError::NoDataAvailable {
                ticker: ticker.to_string(),
                failures,
            });
        };

        let is_aggregated = quotes.len() >= 2;
        let (kept, rejected, agreement) = if is_aggregated {
            let (kept, rejected) = stats::partition_outliers(
                &prices,
                self.policy.outlier_center,
                self.policy.outlier_sigma,
            );
            let agreement = self.policy.confidence.agreement_score(mean, std_dev);
            (kept, rejected, Some(agreement))
        } else {
            (vec![0], Vec::new(), None)
        };

        let kept_prices: Vec<f64> = kept.iter().map(|&i| prices[i]).collect();
        let final_price = stats::median(&kept_prices).unwrap_or(median);

        let ages: Vec<_> = kept.iter().map(|&i| quotes[i].age(now)).collect();
        let reliabilities: Vec<f64> = kept
            .iter()
            .map(|&i| {
                self.registry
                    .get(&quotes[i].source_id)
                    .map_or(0.0, |s| s.config().reliability)
            })
            .collect();
        let confidence = self.policy.confidence.score(&ages, &reliabilities, agreement);

        let rejected_sources: BTreeSet<String> = rejected
            .iter()
            .map(|&i| quotes[i].source_id.clone())
            .collect();
        if !rejected_sources.is_empty() {
            debug!(ticker, ?rejected_sources, "Rejected outlier quotes");
        }
        for failure in &failures {
            debug!(ticker, error = %failure, "Source excluded from sample");
        }

        let aggregated = AggregatedQuote {
            ticker: ticker.to_string(),
            final_price,
            mean,
            median,
            std_dev,
            sources_used: kept.iter().map(|&i| quotes[i].source_id.clone()).collect(),
            rejected_sources,
            source_prices: quotes
                .iter()
                .map(|q| (q.source_id.clone(), q.price))
                .collect(),
            confidence_score: confidence.score,
            confidence,
            is_aggregated,
            aggregated_at: now,
        };

        info!(
            ticker,
            price = aggregated.final_price,
            confidence = aggregated.confidence_score,
            sources = aggregated.sources_used.len(),
            "Aggregated quote"
        );
        Ok(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quote::{QuoteProvider, SourceQuote};
    use crate::core::registry::{SourceConfig, SourceState};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        price: f64,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(price: f64) -> Arc<Self> {
            Arc::new(Self {
                price,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QuoteProvider for StaticProvider {
        async fn fetch_quote(&self, _ticker: &str) -> anyhow::Result<Option<SourceQuote>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(SourceQuote {
                price: self.price,
                observed_at: Utc::now(),
            }))
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl QuoteProvider for BrokenProvider {
        async fn fetch_quote(&self, _ticker: &str) -> anyhow::Result<Option<SourceQuote>> {
            Err(anyhow!("parse error"))
        }
    }

    struct SleepyProvider(Duration);

    #[async_trait]
    impl QuoteProvider for SleepyProvider {
        async fn fetch_quote(&self, _ticker: &str) -> anyhow::Result<Option<SourceQuote>> {
            tokio::time::sleep(self.0).await;
            Ok(Some(SourceQuote {
                price: 42.0,
                observed_at: Utc::now(),
            }))
        }
    }

    fn config(name: &str, priority: u32, reliability: f64) -> SourceConfig {
        let mut config = SourceConfig::new(name, priority);
        config.reliability = reliability;
        config.rate_limit = 100.0;
        config
    }

    fn source(
        config: SourceConfig,
        provider: Arc<dyn QuoteProvider>,
    ) -> (SourceConfig, Arc<dyn QuoteProvider>) {
        (config, provider)
    }

    fn aggregator(sources: Vec<(SourceConfig, Arc<dyn QuoteProvider>)>) -> MultiSourceQuoteAggregator {
        let mut registry = SourceRegistry::new();
        for (config, provider) in sources {
            registry.register(config, provider).unwrap();
        }
        MultiSourceQuoteAggregator::new(Arc::new(registry), AggregationPolicy::default())
    }

    #[tokio::test]
    async fn test_outlier_is_excluded() {
        let agg = aggregator(vec![
            source(config("a", 1, 80.0), StaticProvider::new(100.0)),
            source(config("b", 2, 80.0), StaticProvider::new(100.5)),
            source(config("c", 3, 80.0), StaticProvider::new(99.8)),
            source(config("d", 4, 80.0), StaticProvider::new(500.0)),
        ]);

        let quote = agg.aggregate("AAPL").await.unwrap();
        assert!(quote.is_aggregated);
        assert_eq!(quote.final_price, 100.0);
        assert!(!quote.sources_used.contains("d"));
        assert_eq!(quote.sources_used.len(), 3);
        assert!(quote.rejected_sources.contains("d"));
        assert_eq!(quote.source_prices.len(), 4);
        assert!((quote.mean - 200.075).abs() < 1e-9);
        assert!((quote.median - 100.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_agreeing_sources() {
        let agg = aggregator(vec![
            source(config("a", 1, 90.0), StaticProvider::new(50.0)),
            source(config("b", 2, 70.0), StaticProvider::new(50.0)),
        ]);

        let quote = agg.aggregate("MSFT").await.unwrap();
        assert!(quote.is_aggregated);
        assert_eq!(quote.final_price, 50.0);
        assert_eq!(quote.std_dev, 0.0);
        assert_eq!(quote.confidence.agreement, Some(100.0));
        assert!((quote.confidence_score - 92.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_data_when_every_source_fails() {
        let agg = aggregator(vec![
            source(config("a", 1, 80.0), Arc::new(BrokenProvider)),
            source(config("b", 2, 80.0), Arc::new(BrokenProvider)),
            source(config("c", 3, 80.0), Arc::new(BrokenProvider)),
        ]);

        let err = agg.aggregate("NOPE").await.unwrap_err();
        match err {
            AggregationError::NoDataAvailable { ticker, failures } => {
                assert_eq!(ticker, "NOPE");
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].source_id(), "a");
            }
            other => panic!("Expected NoDataAvailable, got {other:?}"),
        }
        assert!(agg.registry().snapshot().iter().all(|s| s.errors == 1));
    }

    #[tokio::test]
    async fn test_no_enabled_sources_is_no_data() {
        let mut disabled = config("a", 1, 80.0);
        disabled.enabled = false;
        let agg = aggregator(vec![source(disabled, StaticProvider::new(10.0))]);

        assert!(matches!(
            agg.aggregate("X").await,
            Err(AggregationError::NoDataAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_success_reduces_confidence() {
        let full = aggregator(vec![
            source(config("a", 1, 80.0), StaticProvider::new(10.0)),
            source(config("b", 2, 80.0), StaticProvider::new(10.0)),
            source(config("c", 3, 80.0), StaticProvider::new(10.0)),
        ]);
        let partial = aggregator(vec![
            source(config("a", 1, 80.0), StaticProvider::new(10.0)),
            source(config("b", 2, 80.0), Arc::new(BrokenProvider)),
            source(config("c", 3, 80.0), Arc::new(BrokenProvider)),
        ]);

        let full_quote = full.aggregate("X").await.unwrap();
        let partial_quote = partial.aggregate("X").await.unwrap();

        assert!(!partial_quote.is_aggregated);
        assert_eq!(partial_quote.final_price, 10.0);
        assert_eq!(partial_quote.confidence.agreement, None);
        assert!(partial_quote.confidence_score < full_quote.confidence_score);
    }

    #[tokio::test]
    async fn test_repeated_aggregation_is_stable() {
        let agg = aggregator(vec![
            source(config("a", 1, 90.0), StaticProvider::new(101.0)),
            source(config("b", 2, 60.0), StaticProvider::new(100.0)),
            source(config("c", 3, 75.0), StaticProvider::new(100.4)),
        ]);

        let first = agg.aggregate("X").await.unwrap();
        let second = agg.aggregate("X").await.unwrap();
        assert_eq!(first.final_price, second.final_price);
        assert_eq!(first.confidence_score, second.confidence_score);
        assert_eq!(first.sources_used, second.sources_used);
    }

    #[tokio::test]
    async fn test_disabled_source_is_not_queried() {
        let off = StaticProvider::new(1.0);
        let mut disabled = config("off", 1, 80.0);
        disabled.enabled = false;
        let agg = aggregator(vec![
            source(disabled, Arc::clone(&off) as Arc<dyn QuoteProvider>),
            source(config("on", 2, 80.0), StaticProvider::new(2.0)),
        ]);

        let quote = agg.aggregate("X").await.unwrap();
        assert_eq!(quote.final_price, 2.0);
        assert_eq!(off.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            agg.registry().get("off").unwrap().state(),
            SourceState::Disabled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_without_blocking() {
        let mut registry = SourceRegistry::new();
        registry
            .register(config("fast", 1, 80.0), StaticProvider::new(42.5))
            .unwrap();
        registry
            .register(
                config("slow", 2, 80.0),
                Arc::new(SleepyProvider(Duration::from_secs(60))),
            )
            .unwrap();
        let policy = AggregationPolicy {
            fetch_timeout_ms: 500,
            ..AggregationPolicy::default()
        };
        let agg = MultiSourceQuoteAggregator::new(Arc::new(registry), policy);

        let quote = agg.aggregate("X").await.unwrap();
        assert_eq!(quote.final_price, 42.5);
        assert!(!quote.is_aggregated);
        assert_eq!(agg.registry().get("slow").unwrap().snapshot().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_fetched_concurrently() {
        let agg = aggregator(vec![
            source(
                config("a", 1, 80.0),
                Arc::new(SleepyProvider(Duration::from_secs(1))),
            ),
            source(
                config("b", 2, 80.0),
                Arc::new(SleepyProvider(Duration::from_secs(1))),
            ),
        ]);

        let start = tokio::time::Instant::now();
        let quote = agg.aggregate("X").await.unwrap();
        assert!(quote.is_aggregated);
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_aggregation_publishes_nothing() {
        let agg = aggregator(vec![source(
            config("slow", 1, 80.0),
            Arc::new(SleepyProvider(Duration::from_secs(3))),
        )]);

        let result = agg
            .aggregate_until("X", tokio::time::sleep(Duration::from_millis(100)))
            .await;
        assert_eq!(
            result,
            Err(AggregationError::Cancelled {
                ticker: "X".to_string()
            })
        );
        let snapshot = &agg.registry().snapshot()[0];
        assert_eq!((snapshot.hits, snapshot.errors), (0, 0));
        assert_eq!(snapshot.state, SourceState::Idle);
    }

    #[test]
    fn test_combine_uses_quote_age() {
        let agg = aggregator(vec![source(config("a", 1, 100.0), StaticProvider::new(1.0))]);
        let now = Utc::now();
        let fresh = Quote {
            source_id: "a".to_string(),
            price: 10.0,
            observed_at: now,
        };
        let stale = Quote {
            observed_at: now - chrono::Duration::hours(2),
            ..fresh.clone()
        };

        let fresh_quote = agg.combine("X", vec![fresh], Vec::new(), now).unwrap();
        let stale_quote = agg.combine("X", vec![stale], Vec::new(), now).unwrap();
        assert_eq!(fresh_quote.confidence.freshness, 100.0);
        assert_eq!(stale_quote.confidence.freshness, 20.0);
        assert!(stale_quote.confidence_score < fresh_quote.confidence_score);
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(AggregationPolicy::default().validate().is_ok());
        let policy = AggregationPolicy {
            outlier_sigma: 0.0,
            ..AggregationPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
