//! Monthly rollup of daily returns for the returns heatmap.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Calendar month key, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// `None` unless `month` is in `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Result of compounding a bucket of daily returns.
///
/// `Missing` means there were no observations. It is not a zero return and
/// never compares equal to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PeriodReturn {
    Observed { value: f64, observations: usize },
    Missing,
}

impl PeriodReturn {
    pub fn value(&self) -> Option<f64> {
        match self {
            PeriodReturn::Observed { value, .. } => Some(*value),
            PeriodReturn::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PeriodReturn::Missing)
    }

    fn compound<I: IntoIterator<Item = f64>>(returns: I) -> Self {
        let mut growth = 1.0;
        let mut observations = 0;
        for r in returns {
            growth *= 1.0 + r;
            observations += 1;
        }
        if observations == 0 {
            PeriodReturn::Missing
        } else {
            PeriodReturn::Observed {
                value: growth - 1.0,
                observations,
            }
        }
    }
}

/// Converts a dated close series into daily simple returns.
///
/// Input may be unsorted; duplicate dates keep the last close. A return is
/// skipped when the previous close is not positive.
pub fn daily_returns_from_closes(closes: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    let series: BTreeMap<NaiveDate, f64> = closes.iter().copied().collect();

    series
        .iter()
        .zip(series.iter().skip(1))
        .filter(|((_, prev), _)| **prev > 0.0)
        .map(|((_, prev), (date, close))| (*date, close / prev - 1.0))
        .collect()
}

/// Compounds daily returns into every calendar month from `start` to `end`
/// inclusive. Months without observations are `Missing`; observations outside
/// the range are ignored.
pub fn monthly_returns(
    daily: &[(NaiveDate, f64)],
    start: YearMonth,
    end: YearMonth,
) -> BTreeMap<YearMonth, PeriodReturn> {
    let mut buckets: BTreeMap<YearMonth, Vec<f64>> = BTreeMap::new();
    for (date, r) in daily {
        buckets.entry(YearMonth::from_date(*date)).or_default().push(*r);
    }

    let mut result = BTreeMap::new();
    let mut month = start;
    while month <= end {
        let bucket = buckets.remove(&month).unwrap_or_default();
        result.insert(month, PeriodReturn::compound(bucket));
        month = month.next();
    }
    result
}

/// Like [`monthly_returns`], spanning the first to the last observed month.
pub fn monthly_returns_spanning(daily: &[(NaiveDate, f64)]) -> BTreeMap<YearMonth, PeriodReturn> {
    let first = daily.iter().map(|(d, _)| *d).min();
    let last = daily.iter().map(|(d, _)| *d).max();
    match (first, last) {
        (Some(first), Some(last)) => monthly_returns(
            daily,
            YearMonth::from_date(first),
            YearMonth::from_date(last),
        ),
        _ => BTreeMap::new(),
    }
}

/// One heatmap row: twelve month cells and the compounded year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapRow {
    pub year: i32,
    pub months: [PeriodReturn; 12],
    pub year_total: PeriodReturn,
}

/// Arranges monthly returns into calendar-year rows. Months outside the input
/// map (e.g. before the first observation) are `Missing`.
pub fn heatmap(monthly: &BTreeMap<YearMonth, PeriodReturn>) -> Vec<HeatmapRow> {
    let (Some(first), Some(last)) = (monthly.keys().next(), monthly.keys().next_back()) else {
        return Vec::new();
    };

    (first.year..=last.year)
        .map(|year| {
            let mut months = [PeriodReturn::Missing; 12];
            for (i, cell) in months.iter_mut().enumerate() {
                let key = YearMonth {
                    year,
                    month: i as u32 + 1,
                };
                if let Some(ret) = monthly.get(&key) {
                    *cell = *ret;
                }
            }
            let year_total = PeriodReturn::compound(months.iter().filter_map(|m| m.value()));
            HeatmapRow {
                year,
                months,
                year_total,
            }
        })
        .collect()
}
