use anyhow::Result;
use comfy_table::{Cell, Table};
use tracing::info;

use super::{QuoteResults, aggregate_tickers, ctrl_c, ui};
use crate::core::aggregator::MultiSourceQuoteAggregator;
use crate::core::registry::SourceSnapshot;

pub async fn run(tickers: &[String], aggregator: &MultiSourceQuoteAggregator) -> Result<()> {
    info!("Aggregating quotes for {} tickers", tickers.len());

    let pb = ui::new_progress_bar(tickers.len() as u64);
    pb.set_message("Fetching quotes");
    let results = aggregate_tickers(aggregator, tickers, ctrl_c(), &pb).await;
    pb.finish_and_clear();
    let results = results?;

    println!("{}", ui::style_text("Quotes", ui::StyleType::Title));
    println!("{}", quotes_table(&results));
    println!("\n{}", ui::style_text("Sources", ui::StyleType::Title));
    println!("{}", sources_table(&aggregator.registry().snapshot()));
    Ok(())
}

fn joined(names: &std::collections::BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

pub fn quotes_table(results: &QuoteResults) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ticker"),
        ui::header_cell("Price"),
        ui::header_cell("Mean"),
        ui::header_cell("Std Dev"),
        ui::header_cell("Sources"),
        ui::header_cell("Rejected"),
        ui::header_cell("Confidence"),
    ]);

    for (ticker, result) in results {
        match result {
            Ok(quote) => {
                let sources = if quote.is_aggregated {
                    joined(&quote.sources_used)
                } else {
                    format!(
                        "{} {}",
                        joined(&quote.sources_used),
                        ui::style_text("(single)", ui::StyleType::Subtle)
                    )
                };
                let rejected = if quote.rejected_sources.is_empty() {
                    ui::missing_cell()
                } else {
                    Cell::new(joined(&quote.rejected_sources))
                };
                table.add_row(vec![
                    Cell::new(ticker),
                    ui::number_cell(quote.final_price),
                    ui::number_cell(quote.mean),
                    ui::number_cell(quote.std_dev),
                    Cell::new(sources),
                    rejected,
                    ui::confidence_cell(quote.confidence_score),
                ]);
            }
            Err(e) => {
                table.add_row(vec![Cell::new(ticker), ui::error_cell(&e.to_string())]);
            }
        }
    }
    table
}

pub fn sources_table(snapshots: &[SourceSnapshot]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Source"),
        ui::header_cell("Priority"),
        ui::header_cell("Reliability"),
        ui::header_cell("State"),
        ui::header_cell("Hits"),
        ui::header_cell("Misses"),
        ui::header_cell("Errors"),
    ]);
    for s in snapshots {
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(s.priority),
            Cell::new(format!("{:.0}", s.reliability)),
            ui::state_cell(s.state),
            Cell::new(s.hits),
            Cell::new(s.misses),
            Cell::new(s.errors),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AggregationError;
    use crate::core::registry::SourceState;

    #[test]
    fn test_quotes_table_shows_failures_per_ticker() {
        let mut results = QuoteResults::new();
        results.insert(
            "ZZZZ".to_string(),
            Err(AggregationError::NoDataAvailable {
                ticker: "ZZZZ".to_string(),
                failures: Vec::new(),
            }),
        );

        let rendered = quotes_table(&results).to_string();
        assert!(rendered.contains("ZZZZ"));
        assert!(rendered.contains("no data available"));
    }

    #[test]
    fn test_sources_table_lists_counters() {
        let rendered = sources_table(&[SourceSnapshot {
            name: "yahoo".to_string(),
            priority: 1,
            reliability: 90.0,
            state: SourceState::Idle,
            hits: 7,
            misses: 2,
            errors: 1,
        }])
        .to_string();

        assert!(rendered.contains("yahoo"));
        assert!(rendered.contains("idle"));
        assert!(rendered.contains('7'));
    }
}
