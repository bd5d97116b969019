use anyhow::Result;
use comfy_table::Cell;
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::{QuoteResults, aggregate_tickers, ctrl_c, ui};
use crate::core::aggregator::MultiSourceQuoteAggregator;
use crate::core::config::{Portfolio, PositionConfig};
use crate::core::leverage::{
    LeverageAwareReturnCalculator, PortfolioSummary, Position, ReturnRecord,
};

pub struct PositionRow {
    pub symbol: String,
    pub outcome: Result<(Position, ReturnRecord), String>,
    pub weight: Option<f64>,
}

pub struct PortfolioReturns {
    pub name: String,
    pub rows: Vec<PositionRow>,
    pub summary: Option<PortfolioSummary>,
}

pub async fn run(portfolios: &[Portfolio], aggregator: &MultiSourceQuoteAggregator) -> Result<()> {
    info!("Calculating leverage-aware returns...");

    let tickers: Vec<String> = portfolios
        .iter()
        .flat_map(|p| &p.positions)
        .filter(|p| p.needs_quote())
        .map(|p| p.symbol.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let quotes = if tickers.is_empty() {
        QuoteResults::new()
    } else {
        let pb = ui::new_progress_bar(tickers.len() as u64);
        pb.set_message("Fetching quotes");
        let quotes = aggregate_tickers(aggregator, &tickers, ctrl_c(), &pb).await;
        pb.finish_and_clear();
        quotes?
    };

    let num_portfolios = portfolios.len();
    for (i, portfolio) in portfolios.iter().enumerate() {
        let result = evaluate_portfolio(portfolio, &quotes);
        println!(
            "\nPortfolio: {}",
            ui::style_text(&result.name, ui::StyleType::Title)
        );
        display_portfolio_returns(&result);

        if i < num_portfolios - 1 {
            ui::print_separator();
        }
    }
    Ok(())
}

fn current_value(config: &PositionConfig, quotes: &QuoteResults) -> Result<f64, String> {
    if let Some(value) = config.current_value {
        return Ok(value);
    }
    let units = config
        .units
        .ok_or_else(|| "no current_value or units".to_string())?;
    match quotes.get(&config.symbol) {
        Some(Ok(quote)) => Ok(units * quote.final_price),
        Some(Err(e)) => Err(e.to_string()),
        None => Err("quote not available".to_string()),
    }
}

pub fn evaluate_portfolio(portfolio: &Portfolio, quotes: &QuoteResults) -> PortfolioReturns {
    let calculator = LeverageAwareReturnCalculator::new();

    let mut rows: Vec<PositionRow> = portfolio
        .positions
        .iter()
        .map(|config| {
            let outcome = current_value(config, quotes).and_then(|value| {
                let position = config.to_position(value).map_err(|e| e.to_string())?;
                let record = calculator.compute(&position).map_err(|e| e.to_string())?;
                Ok((position, record))
            });
            if let Err(e) = &outcome {
                warn!(portfolio = %portfolio.name, symbol = %config.symbol, error = %e, "Skipping position");
            }
            PositionRow {
                symbol: config.symbol.clone(),
                outcome,
                weight: None,
            }
        })
        .collect();

    // A total over the surviving subset would misstate equity and leverage.
    let failed = rows.iter().filter(|r| r.outcome.is_err()).count();
    let summary = if failed > 0 {
        warn!(
            portfolio = %portfolio.name,
            failed,
            total = rows.len(),
            "Portfolio is incomplete, not summarizing"
        );
        None
    } else if rows.is_empty() {
        None
    } else {
        let positions: Vec<Position> = rows
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok().map(|(p, _)| p.clone()))
            .collect();
        match calculator.summarize(&positions) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(portfolio = %portfolio.name, error = %e, "Cannot summarize portfolio");
                None
            }
        }
    };

    if let Some(summary) = &summary {
        let mut weights = summary.weights.iter();
        for row in rows.iter_mut() {
            row.weight = weights.next().map(|w| w.weight);
        }
    }

    PortfolioReturns {
        name: portfolio.name.clone(),
        rows,
        summary,
    }
}

fn incomplete_message(result: &PortfolioReturns) -> Option<String> {
    let failed = result.rows.iter().filter(|r| r.outcome.is_err()).count();
    (failed > 0).then(|| {
        format!(
            "incomplete: {failed} of {} positions failed",
            result.rows.len()
        )
    })
}

fn display_portfolio_returns(result: &PortfolioReturns) {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Position"),
        ui::header_cell("Equity"),
        ui::header_cell("Cost Basis"),
        ui::header_cell("Value"),
        ui::header_cell("P&L"),
        ui::header_cell("Leverage"),
        ui::header_cell("Return"),
        ui::header_cell("Naive"),
        ui::header_cell("Weight"),
    ]);

    for row in &result.rows {
        match &row.outcome {
            Ok((position, record)) => {
                table.add_row(vec![
                    Cell::new(&row.symbol),
                    ui::number_cell(position.equity),
                    ui::number_cell(position.cost_basis),
                    ui::number_cell(position.current_value),
                    ui::number_cell(record.pnl()),
                    ui::ratio_cell(record.leverage_ratio()),
                    ui::return_cell(record.correct_return()),
                    ui::optional_return_cell(record.naive_return()),
                    ui::optional_return_cell(row.weight),
                ]);
            }
            Err(e) => {
                table.add_row(vec![Cell::new(&row.symbol), ui::error_cell(e)]);
            }
        }
    }

    let total_label = || Cell::new(ui::style_text("Portfolio", ui::StyleType::TotalLabel));
    if let Some(summary) = &result.summary {
        let naive = (summary.total_cost_basis > 0.0)
            .then(|| (summary.total_value - summary.total_cost_basis) / summary.total_cost_basis);
        table.add_row(vec![
            total_label(),
            ui::number_cell(summary.total_equity),
            ui::number_cell(summary.total_cost_basis),
            ui::number_cell(summary.total_value),
            ui::number_cell(summary.total_value - summary.total_cost_basis),
            ui::ratio_cell(summary.leverage_ratio),
            ui::return_cell(summary.correct_return),
            ui::optional_return_cell(naive),
            ui::ratio_cell(summary.weight_sum()),
        ]);
    } else if let Some(message) = incomplete_message(result) {
        table.add_row(vec![total_label(), ui::error_cell(&message)]);
    }

    println!("{table}");
}
