use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::cache::Cache;
use crate::core::quote::{QuoteProvider, SourceQuote};

/// Short-lived cache in front of a quote provider, keyed by ticker.
///
/// Successful answers (including "no data") are cached for `ttl`; errors
/// always go back to the upstream on the next call.
pub struct CachingQuoteProvider<T: QuoteProvider + ?Sized> {
    inner: Arc<T>,
    cache: Cache<String, Option<SourceQuote>>,
    ttl: Duration,
}

impl<T: QuoteProvider + ?Sized> CachingQuoteProvider<T> {
    pub fn new(inner: Arc<T>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::new(),
            ttl,
        }
    }
}

#[async_trait]
impl<T: QuoteProvider + ?Sized> QuoteProvider for CachingQuoteProvider<T> {
    async fn fetch_quote(&self, ticker: &str) -> Result<Option<SourceQuote>> {
        let key = ticker.to_string();
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Cache hit for quote: {}", ticker);
            return Ok(cached);
        }

        let result = self.inner.fetch_quote(ticker).await?;
        self.cache.put(key, result.clone(), Some(self.ttl)).await;
        Ok(result)
    }
}
