//! Core business logic: leverage-aware returns, monthly rollups and
//! multi-source quote aggregation.

pub mod aggregator;
pub mod cache;
pub mod confidence;
pub mod config;
pub mod error;
pub mod leverage;
pub mod log;
pub mod monthly;
pub mod quote;
pub mod registry;
pub mod stats;

// Re-export main types for cleaner imports
pub use aggregator::{AggregatedQuote, AggregationPolicy, MultiSourceQuoteAggregator};
pub use error::{AggregationError, DomainError, SourceFetchError};
pub use leverage::{LeverageAwareReturnCalculator, PortfolioSummary, Position, ReturnRecord};
pub use monthly::{HeatmapRow, PeriodReturn, YearMonth};
pub use quote::{Quote, QuoteProvider, SourceQuote};
pub use registry::{SourceConfig, SourceRegistry, SourceSnapshot, SourceState};
