use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::core::monthly::PeriodReturn;
use crate::core::registry::SourceState;

/// Shown for cells with no observation; distinct from a zero value.
pub const MISSING: &str = "—";

pub enum StyleType {
    Title,
    TotalLabel,
    Error,
    Subtle,
}

pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::TotalLabel => style(text).bold(),
        StyleType::Error => style(text).red(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

pub fn new_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

pub fn number_cell(value: f64) -> Cell {
    Cell::new(format!("{value:.2}")).set_alignment(CellAlignment::Right)
}

pub fn missing_cell() -> Cell {
    Cell::new(MISSING)
        .fg(Color::DarkGrey)
        .set_alignment(CellAlignment::Right)
}

pub fn error_cell(message: &str) -> Cell {
    Cell::new(message).fg(Color::Red)
}

/// A fractional return rendered as a colored percentage.
pub fn return_cell(value: f64) -> Cell {
    let text = format!("{:.2}%", value * 100.0);
    let color = if value >= 0.0 { Color::Green } else { Color::Red };
    Cell::new(text).fg(color).set_alignment(CellAlignment::Right)
}

pub fn optional_return_cell(value: Option<f64>) -> Cell {
    value.map_or_else(missing_cell, return_cell)
}

pub fn period_cell(period: &PeriodReturn) -> Cell {
    optional_return_cell(period.value())
}

/// Multiplier such as leverage or a weight sum, e.g. `2.00x`.
pub fn ratio_cell(value: f64) -> Cell {
    Cell::new(format!("{value:.2}x")).set_alignment(CellAlignment::Right)
}

pub fn confidence_cell(score: f64) -> Cell {
    let color = match score {
        s if s >= 75.0 => Color::Green,
        s if s >= 50.0 => Color::Yellow,
        _ => Color::Red,
    };
    Cell::new(format!("{score:.1}"))
        .fg(color)
        .set_alignment(CellAlignment::Right)
}

pub fn state_cell(state: SourceState) -> Cell {
    let color = match state {
        SourceState::Disabled => Color::DarkGrey,
        SourceState::Idle => Color::Reset,
        SourceState::AwaitingRateLimit => Color::Yellow,
        SourceState::InFlight => Color::Cyan,
    };
    Cell::new(state.to_string()).fg(color)
}

pub fn new_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

pub fn print_separator() {
    let term_width = console::Term::stdout()
        .size_checked()
        .map(|(_, w)| w as usize)
        .unwrap_or(80);
    println!("\n{}", "─".repeat(term_width));
}
