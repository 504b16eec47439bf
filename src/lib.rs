//! StockForge: inventory ABC segmentation and per-item demand forecasting
//!
//! The library exposes two independent engines over cleaned retail
//! transactions: [`segment`] ranks items by monetary value and assigns
//! A/B/C tiers by cumulative share, and [`ForecastEngine`] fits a trend plus
//! multiplicative-seasonality model to one item's daily demand and projects
//! it forward with uncertainty bounds.

pub mod cli;
pub mod data;
pub mod error;
pub mod forecast;
pub mod model;
pub mod report;
pub mod segmentation;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_transactions, ColumnMap, Dataset, Transaction};
pub use error::{AnalysisError, ModelError};
pub use forecast::{
    daily_demand, forecast, DailyDemand, ForecastConfig, ForecastEngine, ForecastOutcome,
    ForecastPoint, ForecastResult, InsufficientData, InsufficientReason,
};
pub use report::AnalysisReport;
pub use segmentation::{
    items_in, segment, segment_transactions, summarize, Category, CategorySummary,
    SegmentationResult, Thresholds,
};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
