pub mod heatmap;
pub mod quote;
pub mod returns;
pub mod setup;
pub mod ui;

use futures::FutureExt;
use futures::future::join_all;
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::future::Future;

use crate::core::aggregator::{AggregatedQuote, MultiSourceQuoteAggregator};
use crate::core::error::AggregationError;

pub type QuoteResults = BTreeMap<String, Result<AggregatedQuote, AggregationError>>;

/// Aggregates every ticker concurrently. When `cancel` fires all outstanding
/// aggregations are dropped and `Cancelled` is returned instead of a partial
/// result set.
pub async fn aggregate_tickers<C>(
    aggregator: &MultiSourceQuoteAggregator,
    tickers: &[String],
    cancel: C,
    pb: &ProgressBar,
) -> Result<QuoteResults, AggregationError>
where
    C: Future<Output = ()>,
{
    let cancel = cancel.shared();
    let futures = tickers.iter().map(|ticker| {
        let cancel = cancel.clone();
        async move {
            let result = aggregator.aggregate_until(ticker, cancel).await;
            pb.inc(1);
            (ticker.clone(), result)
        }
    });
    let results = join_all(futures).await;

    if let Some((ticker, _)) = results
        .iter()
        .find(|(_, r)| matches!(r, Err(AggregationError::Cancelled { .. })))
    {
        return Err(AggregationError::Cancelled {
            ticker: ticker.clone(),
        });
    }
    Ok(results.into_iter().collect())
}

/// Resolves when the user presses Ctrl-C.
pub async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; never cancel.
        std::future::pending::<()>().await;
    }
}
