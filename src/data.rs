//! Transaction model and CSV loading using Polars
//!
//! Loading is the cleaning step the engines rely on: after it, every
//! transaction has a non-empty item id, a parsed timestamp and strictly
//! positive quantity and unit price.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AnalysisError;

/// Timestamp layouts accepted in addition to RFC 3339
const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// A single cleaned line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub item_id: String,
    pub timestamp: NaiveDateTime,
    pub quantity: f64,
    pub unit_price: f64,
}

impl Transaction {
    pub fn new(
        item_id: impl Into<String>,
        timestamp: NaiveDateTime,
        quantity: f64,
        unit_price: f64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            timestamp,
            quantity,
            unit_price,
        }
    }

    /// Monetary value of the line: quantity × unit price
    pub fn line_value(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

/// Source column names for the four fields the engines need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub item: String,
    pub timestamp: String,
    pub quantity: String,
    pub unit_price: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            item: "StockCode".to_string(),
            timestamp: "InvoiceDate".to_string(),
            quantity: "Quantity".to_string(),
            unit_price: "UnitPrice".to_string(),
        }
    }
}

impl ColumnMap {
    /// Reject empty column names before touching the file
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let fields = [
            ("item", &self.item),
            ("timestamp", &self.timestamp),
            ("quantity", &self.quantity),
            ("unit_price", &self.unit_price),
        ];
        for (argument, name) in fields {
            if name.trim().is_empty() {
                return Err(AnalysisError::contract(argument, "column name must not be empty"));
            }
        }
        Ok(())
    }
}

/// Cleaned transactions plus loading statistics
#[derive(Debug, Clone)]
pub struct Dataset {
    pub transactions: Vec<Transaction>,
    /// Rows present in the source file
    pub rows_read: usize,
    /// Rows removed by cleaning
    pub rows_dropped: usize,
}

impl Dataset {
    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        let rows_read = transactions.len();
        Self {
            transactions,
            rows_read,
            rows_dropped: 0,
        }
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.transactions.iter().map(|t| t.timestamp).max()
    }

    pub fn distinct_items(&self) -> usize {
        self.transactions
            .iter()
            .map(|t| t.item_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Load a CSV export and clean it into transactions
///
/// # Arguments
/// * `file_path` - Path to the CSV file
/// * `columns` - Source column names
///
/// # Returns
/// * `Dataset` with only rows satisfying the engine preconditions
pub fn load_transactions(file_path: &str, columns: &ColumnMap) -> crate::Result<Dataset> {
    columns.validate()?;

    // Read every column as a string so identifiers like "85123A" never fail inference
    let raw = LazyCsvReader::new(file_path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .with_context(|| format!("Failed to open {}", file_path))?
        .select([
            col(columns.item.as_str()).alias("item_id"),
            col(columns.timestamp.as_str()).alias("timestamp"),
            // Non-numeric entries become null and are dropped below
            col(columns.quantity.as_str())
                .cast(DataType::Float64)
                .alias("quantity"),
            col(columns.unit_price.as_str())
                .cast(DataType::Float64)
                .alias("unit_price"),
        ])
        .collect()
        .with_context(|| format!("Failed to read required columns from {}", file_path))?;

    let rows_read = raw.height();

    let df = raw
        .lazy()
        .filter(
            col("item_id")
                .is_not_null()
                .and(col("timestamp").is_not_null())
                .and(col("quantity").gt(lit(0.0)))
                .and(col("unit_price").gt(lit(0.0))),
        )
        .collect()?;

    let transactions = extract_transactions(&df)?;

    if transactions.is_empty() {
        anyhow::bail!("No valid transactions found after filtering");
    }

    Ok(Dataset {
        rows_dropped: rows_read - transactions.len(),
        rows_read,
        transactions,
    })
}

/// Convert the filtered frame into typed transactions
fn extract_transactions(df: &DataFrame) -> crate::Result<Vec<Transaction>> {
    let items = df.column("item_id")?.str()?;
    let stamps = df.column("timestamp")?.str()?;
    let quantities = df.column("quantity")?.f64()?;
    let prices = df.column("unit_price")?.f64()?;

    let mut transactions = Vec::with_capacity(df.height());
    let rows = items
        .into_iter()
        .zip(stamps.into_iter())
        .zip(quantities.into_iter())
        .zip(prices.into_iter());

    for (((item, stamp), quantity), price) in rows {
        let (Some(item), Some(stamp), Some(quantity), Some(price)) = (item, stamp, quantity, price)
        else {
            continue;
        };
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        // Unparseable timestamps are dropped like any other invalid row
        let Some(timestamp) = parse_timestamp(stamp) else {
            continue;
        };
        transactions.push(Transaction::new(item, timestamp, quantity, price));
    }

    Ok(transactions)
}

/// Parse a timestamp in any of the supported layouts
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
