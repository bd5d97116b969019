use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use super::parser::ParserChain;
use super::util::{RetryPolicy, fetch_body, http_client};
use crate::core::config::ParserSpec;
use crate::core::quote::{QuoteProvider, SourceQuote};

/// Scrapes a quote page built from a URL template and extracts the price
/// with a parser chain. The observation time is the time of the fetch.
pub struct HttpPageProvider {
    url_template: String,
    parsers: ParserChain,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpPageProvider {
    pub fn new(url_template: &str, parsers: ParserChain) -> Result<Self> {
        Ok(Self {
            url_template: url_template.to_string(),
            parsers,
            client: http_client()?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_specs(url_template: &str, specs: &[ParserSpec]) -> Result<Self> {
        Self::new(url_template, ParserChain::from_specs(specs)?)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url_for(&self, ticker: &str) -> String {
        self.url_template.replace("{ticker}", &urlencoding::encode(ticker))
    }
}

#[async_trait]
impl QuoteProvider for HttpPageProvider {
    #[instrument(name = "PageQuoteFetch", skip(self), fields(ticker = %ticker))]
    async fn fetch_quote(&self, ticker: &str) -> Result<Option<SourceQuote>> {
        let url = self.url_for(ticker);
        debug!("Requesting quote page {}", url);

        let Some(body) = fetch_body(&self.client, &url, self.retry).await? else {
            return Ok(None);
        };

        match self.parsers.parse(&body) {
            Some(price) => Ok(Some(SourceQuote {
                price,
                observed_at: Utc::now(),
            })),
            None => {
                debug!(parsers = self.parsers.len(), "No parser matched {}", url);
                Ok(None)
            }
        }
    }
}
