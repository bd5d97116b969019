//! Leverage-aware return and weight calculations.
//!
//! Profit and loss on a leveraged position accrues to the capital the investor
//! contributed, not to the notional exposure. Returns are therefore always
//! measured against `equity`, and portfolio weights are measured against total
//! equity so that they add up to the leverage ratio instead of 100%.

use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single position observed at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Option<String>,
    /// Capital contributed by the investor.
    pub equity: f64,
    /// Notional value at entry, `equity × leverage_ratio`.
    pub cost_basis: f64,
    /// Current notional market value.
    pub current_value: f64,
}

impl Position {
    pub fn new(equity: f64, cost_basis: f64, current_value: f64) -> Result<Self, DomainError> {
        let position = Self {
            symbol: None,
            equity,
            cost_basis,
            current_value,
        };
        position.validate()?;
        Ok(position)
    }

    /// Builds a position whose cost basis is `equity × leverage_ratio`.
    pub fn leveraged(
        equity: f64,
        leverage_ratio: f64,
        current_value: f64,
    ) -> Result<Self, DomainError> {
        if !leverage_ratio.is_finite() {
            return Err(DomainError::NonFinite {
                field: "leverage_ratio",
            });
        }
        if leverage_ratio < 1.0 {
            return Err(DomainError::InvalidLeverage {
                ratio: leverage_ratio,
            });
        }
        Self::new(equity, equity * leverage_ratio, current_value)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("equity", self.equity),
            ("cost_basis", self.cost_basis),
            ("current_value", self.current_value),
        ] {
            if !value.is_finite() {
                return Err(DomainError::NonFinite { field });
            }
        }
        if self.equity <= 0.0 {
            return Err(DomainError::NonPositiveEquity {
                equity: self.equity,
            });
        }
        if self.cost_basis < 0.0 {
            return Err(DomainError::NegativeValue {
                field: "cost_basis",
                value: self.cost_basis,
            });
        }
        if self.current_value < 0.0 {
            return Err(DomainError::NegativeValue {
                field: "current_value",
                value: self.current_value,
            });
        }
        // Zero cost basis is allowed; otherwise leverage must be at least 1.
        if self.cost_basis > 0.0 && self.cost_basis < self.equity {
            return Err(DomainError::InvalidLeverage {
                ratio: self.leverage_ratio(),
            });
        }
        Ok(())
    }

    pub fn pnl(&self) -> f64 {
        self.current_value - self.cost_basis
    }

    pub fn leverage_ratio(&self) -> f64 {
        self.cost_basis / self.equity
    }
}

/// Returns derived from one position for one observation period.
///
/// Fields are private so a record cannot be altered after it is computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReturnRecord {
    correct_return: f64,
    naive_return: Option<f64>,
    pnl: f64,
    leverage_ratio: f64,
}

impl ReturnRecord {
    /// P&L divided by contributed equity.
    pub fn correct_return(&self) -> f64 {
        self.correct_return
    }

    /// P&L divided by notional cost basis. Understates leveraged returns by the
    /// leverage ratio; kept for diagnostics. `None` when the cost basis is zero.
    pub fn naive_return(&self) -> Option<f64> {
        self.naive_return
    }

    pub fn pnl(&self) -> f64 {
        self.pnl
    }

    pub fn leverage_ratio(&self) -> f64 {
        self.leverage_ratio
    }
}

/// Weight of one position relative to total portfolio equity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionWeight {
    pub symbol: Option<String>,
    /// Fraction of total equity; 2.0 means 200%.
    pub weight: f64,
}

/// Portfolio-level rollup of a set of positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub total_equity: f64,
    pub total_cost_basis: f64,
    pub total_value: f64,
    pub correct_return: f64,
    pub leverage_ratio: f64,
    pub weights: Vec<PositionWeight>,
}

impl PortfolioSummary {
    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().map(|w| w.weight).sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeverageAwareReturnCalculator;

impl LeverageAwareReturnCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, position: &Position) -> Result<ReturnRecord, DomainError> {
        position.validate()?;

        let pnl = position.pnl();
        let correct_return = pnl / position.equity;
        let naive_return = (position.cost_basis > 0.0).then(|| pnl / position.cost_basis);

        debug!(
            symbol = ?position.symbol,
            correct_return,
            ?naive_return,
            "Computed leverage-aware return"
        );

        Ok(ReturnRecord {
            correct_return,
            naive_return,
            pnl,
            leverage_ratio: position.leverage_ratio(),
        })
    }

    /// Weights are `cost_basis_i / total_equity`, so they sum to the portfolio
    /// leverage ratio. They are deliberately not rescaled to 100%.
    pub fn weights(&self, positions: &[Position]) -> Result<Vec<PositionWeight>, DomainError> {
        for position in positions {
            position.validate()?;
        }
        let total_equity: f64 = positions.iter().map(|p| p.equity).sum();
        if total_equity <= 0.0 {
            return Err(DomainError::NonPositiveTotalEquity {
                equity: total_equity,
            });
        }

        Ok(positions
            .iter()
            .map(|p| PositionWeight {
                symbol: p.symbol.clone(),
                weight: p.cost_basis / total_equity,
            })
            .collect())
    }

    pub fn summarize(&self, positions: &[Position]) -> Result<PortfolioSummary, DomainError> {
        let weights = self.weights(positions)?;

        let total_equity: f64 = positions.iter().map(|p| p.equity).sum();
        let total_cost_basis: f64 = positions.iter().map(|p| p.cost_basis).sum();
        let total_value: f64 = positions.iter().map(|p| p.current_value).sum();

        Ok(PortfolioSummary {
            total_equity,
            total_cost_basis,
            total_value,
            correct_return: (total_value - total_cost_basis) / total_equity,
            leverage_ratio: total_cost_basis / total_equity,
            weights,
        })
    }
}
