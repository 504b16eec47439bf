//! ABC segmentation by cumulative share of monetary value

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::data::Transaction;
use crate::error::AnalysisError;

/// Value tier of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    A,
    B,
    C,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::A, Category::B, Category::C];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::A => "A",
            Category::B => "B",
            Category::C => "C",
        };
        f.write_str(label)
    }
}

/// Cumulative-share cutoffs for categories A and B
///
/// Both cutoffs must lie in (0, 1). Their ordering is not checked: with
/// `a >= b` no item can land in B, which is a valid if odd classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub a: f64,
    pub b: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { a: 0.8, b: 0.95 }
    }
}

impl Thresholds {
    pub fn new(a: f64, b: f64) -> Result<Self, AnalysisError> {
        for (argument, value) in [("thresholds.a", a), ("thresholds.b", b)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(AnalysisError::contract(
                    argument,
                    format!("must be in (0, 1), got {}", value),
                ));
            }
        }
        Ok(Self { a, b })
    }

    /// Category for a cumulative share; both boundaries are inclusive
    pub fn classify(&self, cumulative_share: f64) -> Category {
        if cumulative_share <= self.a {
            Category::A
        } else if cumulative_share <= self.b {
            Category::B
        } else {
            Category::C
        }
    }
}

impl FromStr for Thresholds {
    type Err = AnalysisError;

    /// Parse `"a,b"`, e.g. `"0.8,0.95"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 2 {
            return Err(AnalysisError::contract(
                "thresholds",
                "expected two comma-separated values like '0.8,0.95'",
            ));
        }

        let parse = |part: &str| {
            part.trim().parse::<f64>().map_err(|_| {
                AnalysisError::contract("thresholds", format!("invalid number: {}", part.trim()))
            })
        };

        Thresholds::new(parse(parts[0])?, parse(parts[1])?)
    }
}

/// Segmentation row for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub item_id: String,
    pub total_value: f64,
    pub cumulative_value: f64,
    pub cumulative_share: f64,
    pub category: Category,
}

/// Per-category aggregate used for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: Category,
    pub item_count: usize,
    pub total_value: f64,
    /// Fraction of the grand total value held by this category
    pub value_share: f64,
    /// Fraction of all items in this category
    pub item_share: f64,
}

/// Classify items into A/B/C tiers by cumulative contribution to total value
///
/// Items are ranked by descending total value. Items with equal totals are
/// ordered by ascending item id, so the output does not depend on input order.
///
/// # Arguments
/// * `rows` - Source rows, already cleaned
/// * `item_of` - Selects the item identifier of a row
/// * `value_of` - Selects the monetary value of a row
/// * `thresholds` - Cumulative-share cutoffs for A and B
///
/// # Returns
/// * One result per distinct item, in ranked order; empty for empty input
pub fn segment<R, I, V>(
    rows: &[R],
    item_of: I,
    value_of: V,
    thresholds: Thresholds,
) -> Result<Vec<SegmentationResult>, AnalysisError>
where
    I: Fn(&R) -> &str,
    V: Fn(&R) -> f64,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut totals: HashMap<&str, f64> = HashMap::new();
    for row in rows {
        *totals.entry(item_of(row)).or_insert(0.0) += value_of(row);
    }

    let mut ranked: Vec<(&str, f64)> = totals.into_iter().collect();
    ranked.sort_by(|(id_a, value_a), (id_b, value_b)| {
        value_b.total_cmp(value_a).then_with(|| id_a.cmp(id_b))
    });

    let grand_total: f64 = ranked.iter().map(|(_, value)| value).sum();
    if !(grand_total.is_finite() && grand_total != 0.0) {
        return Err(AnalysisError::DegenerateInput { total: grand_total });
    }

    let mut cumulative_value = 0.0;
    let results = ranked
        .into_iter()
        .map(|(item_id, total_value)| {
            cumulative_value += total_value;
            let cumulative_share = cumulative_value / grand_total;
            SegmentationResult {
                item_id: item_id.to_string(),
                total_value,
                cumulative_value,
                cumulative_share,
                category: thresholds.classify(cumulative_share),
            }
        })
        .collect();

    Ok(results)
}

/// Segment transactions by line value (quantity × unit price)
pub fn segment_transactions(
    transactions: &[Transaction],
    thresholds: Thresholds,
) -> Result<Vec<SegmentationResult>, AnalysisError> {
    segment(
        transactions,
        |t| t.item_id.as_str(),
        Transaction::line_value,
        thresholds,
    )
}

/// Item ids of one category, in ranked order
pub fn items_in(results: &[SegmentationResult], category: Category) -> Vec<&str> {
    results
        .iter()
        .filter(|r| r.category == category)
        .map(|r| r.item_id.as_str())
        .collect()
}

/// Aggregate counts and value contribution per category, always in A, B, C order
pub fn summarize(results: &[SegmentationResult]) -> Vec<CategorySummary> {
    let grand_total: f64 = results.iter().map(|r| r.total_value).sum();
    let total_items = results.len();

    Category::ALL
        .iter()
        .map(|&category| {
            let (item_count, total_value) = results
                .iter()
                .filter(|r| r.category == category)
                .fold((0usize, 0.0), |(count, value), r| (count + 1, value + r.total_value));

            CategorySummary {
                category,
                item_count,
                total_value,
                value_share: if grand_total > 0.0 { total_value / grand_total } else { 0.0 },
                item_share: if total_items > 0 {
                    item_count as f64 / total_items as f64
                } else {
                    0.0
                },
            }
        })
        .collect()
}
