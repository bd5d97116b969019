//! Registry of configured quote sources.
//!
//! Each source carries its static configuration, an enable flag, a rate
//! limiter and hit/miss/error counters. Everything mutable is atomic or behind
//! its own lock so concurrent aggregations for different tickers can share one
//! registry.

use crate::core::error::SourceFetchError;
use crate::core::quote::{Quote, QuoteProvider};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

fn default_enabled() -> bool {
    true
}

fn default_rate_limit() -> f64 {
    5.0
}

fn default_reliability() -> f64 {
    70.0
}

/// Slowest accepted rate: one call per day.
pub const MIN_RATE_LIMIT: f64 = 1.0 / 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Lower is queried first.
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum calls per second.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,
    /// Static reliability weight, 0–100.
    #[serde(default = "default_reliability")]
    pub reliability: f64,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: default_enabled(),
            rate_limit: default_rate_limit(),
            reliability: default_reliability(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("source name must not be empty");
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            bail!(
                "source '{}': rate_limit must be a positive number, got {}",
                self.name,
                self.rate_limit
            );
        }
        if self.rate_limit < MIN_RATE_LIMIT {
            bail!(
                "source '{}': rate_limit must be at least one call per day, got {}",
                self.name,
                self.rate_limit
            );
        }
        if !(0.0..=100.0).contains(&self.reliability) {
            bail!(
                "source '{}': reliability must be within 0..=100, got {}",
                self.name,
                self.reliability
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceState {
    Disabled,
    Idle,
    AwaitingRateLimit,
    InFlight,
}

impl Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SourceState::Disabled => "disabled",
                SourceState::Idle => "idle",
                SourceState::AwaitingRateLimit => "awaiting-rate-limit",
                SourceState::InFlight => "in-flight",
            }
        )
    }
}

/// Point-in-time view of a source for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub priority: u32,
    pub reliability: f64,
    pub state: SourceState,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Enforces a minimum interval between calls by handing out time slots.
struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(rate_limit: f64) -> Self {
        let interval = if rate_limit.is_finite() && rate_limit > 0.0 {
            Duration::try_from_secs_f64(1.0 / rate_limit).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserves the next slot and returns how long to wait for it, or the wait
    /// that would have been needed if it exceeds `max_wait`. An interval that
    /// cannot be represented as an `Instant` is never granted a slot.
    async fn reserve(&self, max_wait: Duration) -> Result<Duration, Duration> {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = next_slot.map_or(now, |next| next.max(now));
        let wait = slot - now;
        if wait > max_wait {
            return Err(wait);
        }
        let following = slot.checked_add(self.interval).ok_or(self.interval)?;
        *next_slot = Some(following);
        Ok(wait)
    }
}

/// Decrements a gauge when dropped, including when the owning future is
/// cancelled.
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Limits applied to every fetch attempt.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_rate_limit_wait: Duration,
}

pub struct SourceEntry {
    config: SourceConfig,
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    limiter: RateLimiter,
    provider: Arc<dyn QuoteProvider>,
}

impl SourceEntry {
    fn new(config: SourceConfig, provider: Arc<dyn QuoteProvider>) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            limiter: RateLimiter::new(config.rate_limit),
            config,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SourceState {
        if !self.is_enabled() {
            SourceState::Disabled
        } else if self.in_flight.load(Ordering::SeqCst) > 0 {
            SourceState::InFlight
        } else if self.waiting.load(Ordering::SeqCst) > 0 {
            SourceState::AwaitingRateLimit
        } else {
            SourceState::Idle
        }
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            name: self.config.name.clone(),
            priority: self.config.priority,
            reliability: self.config.reliability,
            state: self.state(),
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }

    /// Fetches one quote, honouring the rate limit and timeout, and records
    /// the outcome against this source's counters.
    pub async fn fetch(&self, ticker: &str, limits: FetchLimits) -> Result<Quote, SourceFetchError> {
        let result = self.fetch_inner(ticker, limits).await;
        match &result {
            Ok(quote) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                debug!(source = %self.name(), ticker, price = quote.price, "Source hit");
            }
            Err(SourceFetchError::Missing { .. }) => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                debug!(source = %self.name(), ticker, "Source miss");
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                warn!(source = %self.name(), ticker, error = %e, "Source fetch failed");
            }
        }
        result
    }

    async fn fetch_inner(&self, ticker: &str, limits: FetchLimits) -> Result<Quote, SourceFetchError> {
        {
            let _waiting = GaugeGuard::enter(&self.waiting);
            let wait = self
                .limiter
                .reserve(limits.max_rate_limit_wait)
                .await
                .map_err(|wait| SourceFetchError::RateLimited {
                    source_id: self.config.name.clone(),
                    wait_ms: wait.as_millis() as u64,
                })?;
            if !wait.is_zero() {
                debug!(source = %self.name(), ?wait, "Waiting for rate limit slot");
                tokio::time::sleep(wait).await;
            }
        }

        let _in_flight = GaugeGuard::enter(&self.in_flight);
        let fetched = tokio::time::timeout(limits.timeout, self.provider.fetch_quote(ticker))
            .await
            .map_err(|_| SourceFetchError::Timeout {
                source_id: self.config.name.clone(),
                timeout_ms: limits.timeout.as_millis() as u64,
            })?;

        match fetched {
            Ok(Some(quote)) if quote.price.is_finite() && quote.price > 0.0 => Ok(Quote {
                source_id: self.config.name.clone(),
                price: quote.price,
                observed_at: quote.observed_at,
            }),
            Ok(Some(quote)) => Err(SourceFetchError::Failed {
                source_id: self.config.name.clone(),
                reason: format!("invalid price {}", quote.price),
            }),
            Ok(None) => Err(SourceFetchError::Missing {
                source_id: self.config.name.clone(),
                ticker: ticker.to_string(),
            }),
            Err(e) => Err(SourceFetchError::Failed {
                source_id: self.config.name.clone(),
                reason: format!("{e:#}"),
            }),
        }
    }
}

#[derive(Default)]
pub struct SourceRegistry {
    entries: Vec<Arc<SourceEntry>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.entries.iter().map(|e| &e.config.name).collect::<Vec<_>>())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: SourceConfig, provider: Arc<dyn QuoteProvider>) -> Result<()> {
        config.validate()?;
        if self.get(&config.name).is_some() {
            bail!("duplicate source name '{}'", config.name);
        }
        debug!(source = %config.name, priority = config.priority, "Registered quote source");
        self.entries.push(Arc::new(SourceEntry::new(config, provider)));
        self.entries.sort_by_key(|e| e.config.priority);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SourceEntry>> {
        self.entries.iter().find(|e| e.config.name == name)
    }

    /// Enabled sources in ascending priority. Ties keep registration order.
    pub fn enabled_sources(&self) -> Vec<Arc<SourceEntry>> {
        self.entries
            .iter()
            .filter(|e| e.is_enabled())
            .cloned()
            .collect()
    }

    /// Returns `false` if no source has that name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.get(name) {
            Some(entry) => {
                entry.enabled.store(enabled, Ordering::SeqCst);
                debug!(source = name, enabled, "Source enable flag changed");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<SourceSnapshot> {
        self.entries.iter().map(|e| e.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quote::SourceQuote;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedProvider(Option<f64>);

    #[async_trait]
    impl QuoteProvider for FixedProvider {
        async fn fetch_quote(&self, _ticker: &str) -> anyhow::Result<Option<SourceQuote>> {
            Ok(self.0.map(|price| SourceQuote {
                price,
                observed_at: Utc::now(),
            }))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl QuoteProvider for FailingProvider {
        async fn fetch_quote(&self, _ticker: &str) -> anyhow::Result<Option<SourceQuote>> {
            Err(anyhow!("connection refused"))
        }
    }

    struct SlowProvider(Duration);

    #[async_trait]
    impl QuoteProvider for SlowProvider {
        async fn fetch_quote(&self, _ticker: &str) -> anyhow::Result<Option<SourceQuote>> {
            tokio::time::sleep(self.0).await;
            Ok(Some(SourceQuote {
                price: 1.0,
                observed_at: Utc::now(),
            }))
        }
    }

    fn limits() -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(5),
            max_rate_limit_wait: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_registry_orders_by_priority_and_rejects_duplicates() {
        let mut registry = SourceRegistry::new();
        registry
            .register(SourceConfig::new("b", 2), Arc::new(FixedProvider(Some(1.0))))
            .unwrap();
        registry
            .register(SourceConfig::new("a", 1), Arc::new(FixedProvider(Some(1.0))))
            .unwrap();
        registry
            .register(SourceConfig::new("c", 2), Arc::new(FixedProvider(Some(1.0))))
            .unwrap();

        let names: Vec<_> = registry
            .enabled_sources()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let dup = registry.register(SourceConfig::new("a", 9), Arc::new(FailingProvider));
        assert!(dup.is_err());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_invalid_source_config_is_rejected() {
        let mut registry = SourceRegistry::new();
        let mut config = SourceConfig::new("bad", 1);
        config.rate_limit = 0.0;
        assert!(registry.register(config, Arc::new(FailingProvider)).is_err());

        let mut config = SourceConfig::new("bad", 1);
        config.reliability = 120.0;
        assert!(registry.register(config, Arc::new(FailingProvider)).is_err());
    }

    #[test]
    fn test_tiny_rate_limit_is_rejected_at_registration() {
        let mut registry = SourceRegistry::new();
        for rate_limit in [1e-30, 1e-19, MIN_RATE_LIMIT / 2.0] {
            let mut config = SourceConfig::new("slow", 1);
            config.rate_limit = rate_limit;
            let err = registry
                .register(config, Arc::new(FixedProvider(Some(1.0))))
                .unwrap_err();
            assert!(err.to_string().contains("rate_limit"));
        }
        assert!(registry.is_empty());

        let mut config = SourceConfig::new("daily", 1);
        config.rate_limit = MIN_RATE_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_is_rate_limited() {
        for rate_limit in [1e-30, 1e-19] {
            let limiter = RateLimiter::new(rate_limit);
            let first = limiter.reserve(Duration::from_secs(1)).await;
            assert!(first.is_err());
            let second = limiter.reserve(Duration::from_secs(1)).await;
            assert!(second.is_err());
        }
        let limiter = RateLimiter::new(MIN_RATE_LIMIT);
        assert_eq!(limiter.reserve(Duration::ZERO).await, Ok(Duration::ZERO));
        assert!(limiter.reserve(Duration::ZERO).await.is_err());
    }

    #[test]
    fn test_disabled_sources_are_skipped_until_enabled() {
        let mut registry = SourceRegistry::new();
        let mut config = SourceConfig::new("off", 1);
        config.enabled = false;
        registry
            .register(config, Arc::new(FixedProvider(Some(1.0))))
            .unwrap();

        assert!(registry.enabled_sources().is_empty());
        assert_eq!(registry.get("off").unwrap().state(), SourceState::Disabled);

        assert!(registry.set_enabled("off", true));
        assert_eq!(registry.enabled_sources().len(), 1);
        assert_eq!(registry.get("off").unwrap().state(), SourceState::Idle);
        assert!(!registry.set_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_counters_track_outcomes() {
        let mut registry = SourceRegistry::new();
        registry
            .register(SourceConfig::new("hit", 1), Arc::new(FixedProvider(Some(10.0))))
            .unwrap();
        registry
            .register(SourceConfig::new("miss", 2), Arc::new(FixedProvider(None)))
            .unwrap();
        registry
            .register(SourceConfig::new("err", 3), Arc::new(FailingProvider))
            .unwrap();
        registry
            .register(SourceConfig::new("bad", 4), Arc::new(FixedProvider(Some(-1.0))))
            .unwrap();

        let quote = registry.get("hit").unwrap().fetch("X", limits()).await.unwrap();
        assert_eq!(quote.source_id, "hit");
        assert_eq!(quote.price, 10.0);

        let miss = registry.get("miss").unwrap().fetch("X", limits()).await;
        assert!(matches!(miss, Err(SourceFetchError::Missing { .. })));

        let err = registry.get("err").unwrap().fetch("X", limits()).await;
        assert_eq!(
            err,
            Err(SourceFetchError::Failed {
                source_id: "err".to_string(),
                reason: "connection refused".to_string()
            })
        );

        let bad = registry.get("bad").unwrap().fetch("X", limits()).await;
        assert!(matches!(bad, Err(SourceFetchError::Failed { .. })));

        let snapshot = registry.snapshot();
        assert_eq!((snapshot[0].hits, snapshot[0].misses, snapshot[0].errors), (1, 0, 0));
        assert_eq!((snapshot[1].hits, snapshot[1].misses, snapshot[1].errors), (0, 1, 0));
        assert_eq!((snapshot[2].hits, snapshot[2].misses, snapshot[2].errors), (0, 0, 1));
        assert_eq!((snapshot[3].hits, snapshot[3].misses, snapshot[3].errors), (0, 0, 1));
        assert!(snapshot.iter().all(|s| s.state == SourceState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spaces_calls() {
        let mut registry = SourceRegistry::new();
        let mut config = SourceConfig::new("limited", 1);
        config.rate_limit = 2.0;
        registry
            .register(config, Arc::new(FixedProvider(Some(1.0))))
            .unwrap();
        let entry = registry.get("limited").unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            entry.fetch("X", limits()).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(entry.snapshot().hits, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_long_waits() {
        let mut registry = SourceRegistry::new();
        let mut config = SourceConfig::new("limited", 1);
        config.rate_limit = 0.1;
        registry
            .register(config, Arc::new(FixedProvider(Some(1.0))))
            .unwrap();
        let entry = registry.get("limited").unwrap();
        let limits = FetchLimits {
            timeout: Duration::from_secs(1),
            max_rate_limit_wait: Duration::from_secs(1),
        };

        assert!(entry.fetch("X", limits).await.is_ok());
        let second = entry.fetch("X", limits).await;
        assert!(matches!(second, Err(SourceFetchError::RateLimited { .. })));
        assert_eq!(entry.snapshot().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_error() {
        let mut registry = SourceRegistry::new();
        registry
            .register(
                SourceConfig::new("slow", 1),
                Arc::new(SlowProvider(Duration::from_secs(10))),
            )
            .unwrap();
        let entry = registry.get("slow").unwrap();
        let limits = FetchLimits {
            timeout: Duration::from_millis(200),
            max_rate_limit_wait: Duration::from_secs(1),
        };

        let result = entry.fetch("X", limits).await;
        assert_eq!(
            result,
            Err(SourceFetchError::Timeout {
                source_id: "slow".to_string(),
                timeout_ms: 200
            })
        );
        assert_eq!(entry.snapshot().errors, 1);
        assert_eq!(entry.state(), SourceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_in_flight_during_fetch() {
        let mut registry = SourceRegistry::new();
        registry
            .register(
                SourceConfig::new("slow", 1),
                Arc::new(SlowProvider(Duration::from_secs(1))),
            )
            .unwrap();
        let entry = Arc::clone(registry.get("slow").unwrap());

        let task = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.fetch("X", limits()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(entry.state(), SourceState::InFlight);

        task.await.unwrap().unwrap();
        assert_eq!(entry.state(), SourceState::Idle);
    }
}
