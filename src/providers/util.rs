use anyhow::{Context, Error, Result};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = concat!("atlas/", env!("CARGO_PKG_VERSION"));

/// Fixed-attempt, fixed-delay retry schedule for upstream requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }
}

/// Retries an async operation according to `policy`
///
/// Returns the first success, or the last error once `1 + policy.retries`
/// attempts have failed.
pub async fn with_retry<F, Fut, T, E>(policy: RetryPolicy, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(Into::into) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > policy.retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt,
                    policy.retries + 1,
                    err
                );
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

/// GETs `url` and returns the body. A 404 is reported as `None` so callers
/// can treat it as "no data for this ticker".
pub async fn fetch_body(
    client: &reqwest::Client,
    url: &str,
    policy: RetryPolicy,
) -> Result<Option<String>> {
    with_retry(policy, || async move {
        let response = client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.text().await?;
        Ok::<_, reqwest::Error>(Some(body))
    })
    .await
    .with_context(|| format!("Request failed: {url}"))
}
