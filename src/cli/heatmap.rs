use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::{Attribute, Cell, Table};
use tracing::info;

use super::ui;
use crate::core::monthly::{self, HeatmapRow};
use crate::providers::yahoo_finance::YahooQuoteProvider;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub async fn run(ticker: &str, range: &str, provider: &YahooQuoteProvider) -> Result<()> {
    info!("Building monthly heatmap for {}", ticker);

    let pb = ui::new_progress_bar(1);
    pb.set_message(format!("Fetching {range} of history"));
    let closes = provider.daily_closes(ticker, range).await;
    pb.finish_and_clear();
    let closes = closes?;

    let rows = heatmap_rows(&closes);
    if rows.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("No price history available for {ticker}"),
                ui::StyleType::Error
            )
        );
        return Ok(());
    }

    println!(
        "\nMonthly returns: {}",
        ui::style_text(ticker, ui::StyleType::Title)
    );
    println!("{}", heatmap_table(&rows));
    Ok(())
}

pub fn heatmap_rows(closes: &[(NaiveDate, f64)]) -> Vec<HeatmapRow> {
    let daily = monthly::daily_returns_from_closes(closes);
    monthly::heatmap(&monthly::monthly_returns_spanning(&daily))
}

pub fn heatmap_table(rows: &[HeatmapRow]) -> Table {
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("Year")];
    header.extend(MONTHS.iter().map(|m| ui::header_cell(m)));
    header.push(ui::header_cell("Year"));
    table.set_header(header);

    for row in rows {
        let mut cells = vec![Cell::new(row.year).add_attribute(Attribute::Bold)];
        cells.extend(row.months.iter().map(ui::period_cell));
        cells.push(ui::period_cell(&row.year_total).add_attribute(Attribute::Bold));
        table.add_row(cells);
    }
    table
}
