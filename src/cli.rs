//! Command-line interface definitions and argument parsing

use clap::Parser;

use crate::data::ColumnMap;
use crate::forecast::ForecastConfig;
use crate::segmentation::Thresholds;

/// Inventory ABC segmentation and per-item demand forecasting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Column holding the item identifier
    #[arg(long, default_value = "StockCode")]
    pub item_column: String,

    /// Column holding the transaction timestamp
    #[arg(long, default_value = "InvoiceDate")]
    pub date_column: String,

    /// Column holding the quantity
    #[arg(long, default_value = "Quantity")]
    pub quantity_column: String,

    /// Column holding the unit price
    #[arg(long, default_value = "UnitPrice")]
    pub price_column: String,

    /// Cumulative-share cutoffs for categories A and B
    /// Example: --thresholds "0.8,0.95"
    #[arg(short, long, default_value = "0.8,0.95")]
    pub thresholds: String,

    /// Number of ranked items to print
    #[arg(long, default_value = "20")]
    pub top: usize,

    /// Item to forecast (defaults to the highest-value A item)
    #[arg(short, long)]
    pub forecast: Option<String>,

    /// Days to forecast past the last observation
    #[arg(long, default_value = "30")]
    pub horizon: u32,

    /// Skip the forecasting step
    #[arg(long)]
    pub no_forecast: bool,

    /// Disable weekly seasonality
    #[arg(long)]
    pub no_weekly: bool,

    /// Disable yearly seasonality
    #[arg(long)]
    pub no_yearly: bool,

    /// Coverage of the forecast interval
    #[arg(long, default_value = "0.8")]
    pub interval_width: f64,

    /// Write the full results as JSON to this path
    #[arg(short, long)]
    pub output: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the thresholds string
    /// Expected format: "a,b"
    pub fn parse_thresholds(&self) -> crate::Result<Thresholds> {
        self.thresholds
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid thresholds '{}': {}", self.thresholds, e))
    }

    pub fn column_map(&self) -> ColumnMap {
        ColumnMap {
            item: self.item_column.clone(),
            timestamp: self.date_column.clone(),
            quantity: self.quantity_column.clone(),
            unit_price: self.price_column.clone(),
        }
    }

    /// Forecast settings derived from the flags
    pub fn forecast_config(&self) -> crate::Result<ForecastConfig> {
        if !self.no_forecast && self.horizon == 0 {
            anyhow::bail!("Horizon must be at least one day");
        }

        let config = ForecastConfig {
            weekly_seasonality: !self.no_weekly,
            yearly_seasonality: !self.no_yearly,
            interval_width: self.interval_width,
            ..ForecastConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
