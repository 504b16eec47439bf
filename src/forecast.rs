//! Per-item daily demand forecasting
//!
//! Demand for one item is aggregated into a daily series of observed days
//! (no zero filling), a [`SeasonalModel`] is fitted to it and predictions are
//! produced for every observed day plus a contiguous run of future days.
//! Sparse history and fitting failures are reported as
//! [`ForecastOutcome::Insufficient`] rather than as errors.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::Span;

use crate::data::Transaction;
use crate::error::{AnalysisError, ModelError};
use crate::model::{Seasonality, SeasonalModel};

/// Fewest distinct observed days a trend can be fitted to
pub const MIN_OBSERVED_DAYS: usize = 2;

/// Model and interval settings for the forecast engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub weekly_seasonality: bool,
    pub weekly_order: usize,
    pub yearly_seasonality: bool,
    pub yearly_order: usize,
    /// Upper bound on trend changepoints
    pub n_changepoints: usize,
    /// Fraction of history in which changepoints may be placed
    pub changepoint_range: f64,
    /// Smaller values keep the trend stiffer
    pub changepoint_prior_scale: f64,
    /// Smaller values damp seasonal amplitude
    pub seasonality_prior_scale: f64,
    /// Coverage of the lower/upper bounds, e.g. 0.8 for an 80% interval
    pub interval_width: f64,
    pub max_iterations: usize,
    /// Relative objective change at which fitting stops
    pub tolerance: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            weekly_seasonality: true,
            weekly_order: 3,
            yearly_seasonality: true,
            yearly_order: 10,
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            interval_width: 0.8,
            max_iterations: 200,
            tolerance: 1e-6,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(AnalysisError::contract("interval_width", "must be in (0, 1)"));
        }
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(AnalysisError::contract("changepoint_range", "must be in (0, 1]"));
        }
        if !(self.changepoint_prior_scale > 0.0) {
            return Err(AnalysisError::contract("changepoint_prior_scale", "must be positive"));
        }
        if !(self.seasonality_prior_scale > 0.0) {
            return Err(AnalysisError::contract("seasonality_prior_scale", "must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(AnalysisError::contract("max_iterations", "must be positive"));
        }
        if !(self.tolerance > 0.0) {
            return Err(AnalysisError::contract("tolerance", "must be positive"));
        }
        Ok(())
    }

    /// Enabled seasonal terms; intra-day seasonality is never modelled
    pub fn seasonalities(&self) -> Vec<Seasonality> {
        let mut terms = Vec::new();
        if self.weekly_seasonality && self.weekly_order > 0 {
            terms.push(Seasonality::weekly(self.weekly_order));
        }
        if self.yearly_seasonality && self.yearly_order > 0 {
            terms.push(Seasonality::yearly(self.yearly_order));
        }
        terms
    }
}

/// Total quantity for one item on one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyDemand {
    pub date: NaiveDate,
    pub total_quantity: f64,
}

/// One row of the forecast output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
    pub trend: f64,
}

/// Fitted history and projected horizon for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub item_id: String,
    pub horizon_days: u32,
    /// Last observed date; later points are projections
    pub split_date: NaiveDate,
    pub predictions: Vec<ForecastPoint>,
}

impl ForecastResult {
    /// Points on observed days
    pub fn fitted(&self) -> &[ForecastPoint] {
        &self.predictions[..self.split_index()]
    }

    /// Points strictly after the split date
    pub fn projected(&self) -> &[ForecastPoint] {
        &self.predictions[self.split_index()..]
    }

    fn split_index(&self) -> usize {
        self.predictions
            .partition_point(|point| point.date <= self.split_date)
    }
}

/// Why no forecast was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsufficientReason {
    /// Fewer than [`MIN_OBSERVED_DAYS`] distinct days of history
    TooFewObservations,
    /// The model could not be fitted or evaluated
    FitFailed(String),
}

/// Expected outcome for items whose history cannot support a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsufficientData {
    pub item_id: String,
    pub observed_days: usize,
    pub reason: InsufficientReason,
}

/// Result of a forecast request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForecastOutcome {
    Forecast(ForecastResult),
    Insufficient(InsufficientData),
}

impl ForecastOutcome {
    pub fn forecast(&self) -> Option<&ForecastResult> {
        match self {
            ForecastOutcome::Forecast(result) => Some(result),
            ForecastOutcome::Insufficient(_) => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, ForecastOutcome::Insufficient(_))
    }
}

/// Aggregate one item's quantities by calendar day, ascending by date
///
/// Only days with at least one matching row appear in the output.
pub fn daily_demand<R, I, D, Q>(
    rows: &[R],
    item_id: &str,
    item_of: I,
    timestamp_of: D,
    quantity_of: Q,
) -> Vec<DailyDemand>
where
    I: Fn(&R) -> &str,
    D: Fn(&R) -> NaiveDateTime,
    Q: Fn(&R) -> f64,
{
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in rows {
        if item_of(row) != item_id {
            continue;
        }
        *by_day.entry(timestamp_of(row).date()).or_insert(0.0) += quantity_of(row);
    }

    by_day
        .into_iter()
        .map(|(date, total_quantity)| DailyDemand {
            date,
            total_quantity,
        })
        .collect()
}

/// Forecast engine holding model settings and its diagnostic span
///
/// Every fit uses a fresh model, so one engine can serve concurrent calls
/// for different items.
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    config: ForecastConfig,
    span: Span,
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self {
            config: ForecastConfig::default(),
            span: Span::current(),
        }
    }
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            config,
            span: Span::current(),
        })
    }

    /// Emit diagnostics as children of `span` instead of the caller's current span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecast daily demand for one item from cleaned transactions
    pub fn forecast(
        &self,
        transactions: &[Transaction],
        item_id: &str,
        horizon_days: u32,
    ) -> Result<ForecastOutcome, AnalysisError> {
        self.forecast_by(
            transactions,
            item_id,
            |t| t.item_id.as_str(),
            |t| t.timestamp,
            |t| t.quantity,
            horizon_days,
        )
    }

    /// Forecast over arbitrary rows using field selectors
    ///
    /// # Arguments
    /// * `rows` - Source rows, already cleaned
    /// * `item_id` - Item to forecast; an unknown item yields zero observed days
    /// * `item_of`, `timestamp_of`, `quantity_of` - Field selectors
    /// * `horizon_days` - Days to project past the last observation, must be positive
    pub fn forecast_by<R, I, D, Q>(
        &self,
        rows: &[R],
        item_id: &str,
        item_of: I,
        timestamp_of: D,
        quantity_of: Q,
        horizon_days: u32,
    ) -> Result<ForecastOutcome, AnalysisError>
    where
        I: Fn(&R) -> &str,
        D: Fn(&R) -> NaiveDateTime,
        Q: Fn(&R) -> f64,
    {
        if horizon_days == 0 {
            return Err(AnalysisError::contract("horizon_days", "must be positive"));
        }
        if item_id.is_empty() {
            return Err(AnalysisError::contract("item_id", "must not be empty"));
        }

        let series = daily_demand(rows, item_id, item_of, timestamp_of, quantity_of);
        let observed_days = series.len();

        if observed_days < MIN_OBSERVED_DAYS {
            tracing::warn!(
                parent: &self.span,
                item_id,
                observed_days,
                horizon_days,
                "not enough observed days to fit a forecast"
            );
            return Ok(ForecastOutcome::Insufficient(InsufficientData {
                item_id: item_id.to_string(),
                observed_days,
                reason: InsufficientReason::TooFewObservations,
            }));
        }

        match self.fit_and_project(&series, horizon_days) {
            Ok(predictions) => {
                let split_date = series[observed_days - 1].date;
                tracing::info!(
                    parent: &self.span,
                    item_id,
                    observed_days,
                    horizon_days,
                    %split_date,
                    "forecast generated"
                );
                Ok(ForecastOutcome::Forecast(ForecastResult {
                    item_id: item_id.to_string(),
                    horizon_days,
                    split_date,
                    predictions,
                }))
            }
            Err(error) => {
                tracing::error!(
                    parent: &self.span,
                    item_id,
                    observed_days,
                    horizon_days,
                    %error,
                    "forecast model failed"
                );
                Ok(ForecastOutcome::Insufficient(InsufficientData {
                    item_id: item_id.to_string(),
                    observed_days,
                    reason: InsufficientReason::FitFailed(error.to_string()),
                }))
            }
        }
    }

    fn fit_and_project(
        &self,
        series: &[DailyDemand],
        horizon_days: u32,
    ) -> Result<Vec<ForecastPoint>, ModelError> {
        let history: Vec<NaiveDate> = series.iter().map(|d| d.date).collect();
        let values: Vec<f64> = series.iter().map(|d| d.total_quantity).collect();

        let model = SeasonalModel::fit(&history, &values, &self.config)?;
        tracing::debug!(
            parent: &self.span,
            iterations = model.iterations(),
            "seasonal model fitted"
        );

        let dates = extend_dates(&history, horizon_days);
        let predictions = model.predict(&dates)?;

        Ok(dates
            .into_iter()
            .zip(predictions)
            .map(|(date, p)| ForecastPoint {
                date,
                predicted: p.predicted,
                lower: p.lower,
                upper: p.upper,
                trend: p.trend,
            })
            .collect())
    }
}

/// Observed dates followed by `horizon_days` consecutive days after the last one
fn extend_dates(history: &[NaiveDate], horizon_days: u32) -> Vec<NaiveDate> {
    let mut dates = history.to_vec();
    if let Some(&last) = history.last() {
        dates.extend((1..=i64::from(horizon_days)).map(|offset| last + Duration::days(offset)));
    }
    dates
}

/// Forecast with default settings, logging under the caller's current span
pub fn forecast(
    transactions: &[Transaction],
    item_id: &str,
    horizon_days: u32,
) -> Result<ForecastOutcome, AnalysisError> {
    ForecastEngine::default().forecast(transactions, item_id, horizon_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn synthetic_history(item: &str, days: i64, seed: u64) -> Vec<Transaction> {
        let mut rng = StdRng::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2010, 12, 1).unwrap();
        (0..days)
            .filter_map(|offset| {
                // Roughly one day in five has no sales
                if !rng.gen_bool(0.8) {
                    return None;
                }
                let date = start + Duration::days(offset);
                let weekend = date.weekday().number_from_monday() >= 6;
                let base = 20.0 + offset as f64 * 0.05;
                let quantity = if weekend { base * 0.5 } else { base } + rng.gen_range(0.0..3.0);
                Some(Transaction::new(item, date.and_hms_opt(12, 0, 0).unwrap(), quantity, 1.5))
            })
            .collect()
    }

    /// Sparse, noisy demand with occasional bulk orders
    fn spiky_history(item: &str, days: i64, seed: u64) -> Vec<Transaction> {
        let mut rng = StdRng::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2011, 2, 1).unwrap();
        (0..days)
            .filter_map(|offset| {
                if rng.gen_bool(0.45) {
                    return None;
                }
                let quantity = if rng.gen_bool(0.1) {
                    rng.gen_range(300.0..840.0)
                } else {
                    rng.gen_range(30.0..160.0)
                };
                let date = start + Duration::days(offset);
                Some(Transaction::new(item, date.and_hms_opt(11, 0, 0).unwrap(), quantity, 2.1))
            })
            .collect()
    }

    #[test]
    fn test_daily_demand_aggregates_by_day() {
        let transactions = vec![
            Transaction::new("X", at(2011, 1, 3, 9), 5.0, 2.0),
            Transaction::new("X", at(2011, 1, 1, 9), 2.0, 2.0),
            Transaction::new("X", at(2011, 1, 1, 17), 3.0, 2.0),
            Transaction::new("Y", at(2011, 1, 2, 9), 7.0, 1.0),
        ];

        let series = daily_demand(
            &transactions,
            "X",
            |t| t.item_id.as_str(),
            |t| t.timestamp,
            |t| t.quantity,
        );

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2011, 1, 1).unwrap());
        assert_eq!(series[0].total_quantity, 5.0);
        // No zero-filled 2011-01-02 entry
        assert_eq!(series[1].date, NaiveDate::from_ymd_opt(2011, 1, 3).unwrap());
    }

    #[test]
    fn test_single_day_is_insufficient() {
        let transactions = vec![
            Transaction::new("X", at(2011, 1, 1, 9), 5.0, 2.0),
            Transaction::new("X", at(2011, 1, 1, 15), 3.0, 2.0),
        ];

        let outcome = forecast(&transactions, "X", 30).unwrap();
        assert!(outcome.is_insufficient());
        assert_eq!(
            outcome,
            ForecastOutcome::Insufficient(InsufficientData {
                item_id: "X".to_string(),
                observed_days: 1,
                reason: InsufficientReason::TooFewObservations,
            })
        );
    }

    #[test]
    fn test_unknown_item_is_insufficient() {
        let transactions = vec![Transaction::new("X", at(2011, 1, 1, 9), 5.0, 2.0)];

        match forecast(&transactions, "missing", 7).unwrap() {
            ForecastOutcome::Insufficient(signal) => {
                assert_eq!(signal.item_id, "missing");
                assert_eq!(signal.observed_days, 0);
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }
    }

    #[test]
    fn test_two_days_proceed_to_fit() {
        let transactions = vec![
            Transaction::new("X", at(2011, 1, 1, 9), 5.0, 2.0),
            Transaction::new("X", at(2011, 1, 4, 9), 8.0, 2.0),
        ];

        let outcome = forecast(&transactions, "X", 5).unwrap();
        assert!(!outcome.is_insufficient());
        let result = outcome.forecast().expect("two observed days should fit");

        assert_eq!(result.split_date, NaiveDate::from_ymd_opt(2011, 1, 4).unwrap());
        assert_eq!(result.predictions.len(), 2 + 5);
        assert_eq!(result.fitted().len(), 2);
        assert_eq!(result.projected().len(), 5);
    }

    #[test]
    fn test_horizon_is_contiguous() {
        let transactions = synthetic_history("85123A", 120, 3);
        let outcome = forecast(&transactions, "85123A", 30).unwrap();
        let result = outcome.forecast().unwrap();

        let projected = result.projected();
        assert_eq!(projected.len(), 30);
        assert_eq!(projected[0].date, result.split_date + Duration::days(1));
        for pair in projected.windows(2) {
            assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
        }

        let observed = daily_demand(
            &transactions,
            "85123A",
            |t| t.item_id.as_str(),
            |t| t.timestamp,
            |t| t.quantity,
        );
        assert_eq!(result.fitted().len(), observed.len());
        assert!(result
            .predictions
            .iter()
            .all(|p| p.lower <= p.predicted && p.predicted <= p.upper));
    }

    #[test]
    fn test_default_config_projections_stay_near_history() {
        for (days, seed) in [(60, 1), (75, 2), (90, 3), (120, 4), (120, 5)] {
            let transactions = spiky_history("22423", days, seed);
            let peak = transactions
                .iter()
                .map(|t| t.quantity)
                .fold(0.0_f64, f64::max);

            let outcome = forecast(&transactions, "22423", 30).unwrap();
            let result = outcome
                .forecast()
                .unwrap_or_else(|| panic!("{} days, seed {}: {:?}", days, seed, outcome));

            for point in result.projected() {
                assert!(
                    point.predicted.abs() <= 3.0 * peak && point.trend.abs() <= 2.0 * peak,
                    "{} days, seed {}: {:?} against peak {}",
                    days,
                    seed,
                    point,
                    peak
                );
            }
        }
    }

    #[test]
    fn test_implausible_fit_degrades_to_insufficient() {
        // Steady growth projected more than a year out runs past the plausible range
        let transactions: Vec<Transaction> = (0..60)
            .map(|offset| {
                let date = NaiveDate::from_ymd_opt(2011, 1, 1).unwrap() + Duration::days(offset);
                Transaction::new("X", date.and_hms_opt(9, 0, 0).unwrap(), (offset + 1) as f64, 1.0)
            })
            .collect();

        let config = ForecastConfig {
            weekly_seasonality: false,
            yearly_seasonality: false,
            ..ForecastConfig::default()
        };
        let engine = ForecastEngine::new(config).unwrap();
        assert!(!engine.config().yearly_seasonality);

        assert!(!engine.forecast(&transactions, "X", 30).unwrap().is_insufficient());
        match engine.forecast(&transactions, "X", 400).unwrap() {
            ForecastOutcome::Insufficient(signal) => {
                assert_eq!(signal.observed_days, 60);
                assert!(matches!(signal.reason, InsufficientReason::FitFailed(_)));
            }
            other => panic!("expected implausible fit, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_horizon_is_contract_violation() {
        let transactions = synthetic_history("X", 30, 1);
        let result = forecast(&transactions, "X", 0);
        assert!(matches!(
            result,
            Err(AnalysisError::ContractViolation { .. })
        ));
    }

    #[test]
    fn test_fit_failure_degrades_to_insufficient() {
        let config = ForecastConfig {
            max_iterations: 1,
            tolerance: 1e-300,
            ..ForecastConfig::default()
        };
        let engine = ForecastEngine::new(config).unwrap();
        let transactions = synthetic_history("X", 200, 5);

        match engine.forecast(&transactions, "X", 14).unwrap() {
            ForecastOutcome::Insufficient(signal) => {
                assert!(signal.observed_days >= MIN_OBSERVED_DAYS);
                assert!(matches!(signal.reason, InsufficientReason::FitFailed(_)));
            }
            other => panic!("expected fit failure, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_history_degrades_to_insufficient() {
        let transactions = vec![
            Transaction::new("X", at(2011, 1, 1, 9), 5.0, 2.0),
            Transaction::new("X", at(2011, 1, 2, 9), f64::NAN, 2.0),
            Transaction::new("X", at(2011, 1, 3, 9), 4.0, 2.0),
        ];

        match forecast(&transactions, "X", 7).unwrap() {
            ForecastOutcome::Insufficient(signal) => {
                assert_eq!(signal.observed_days, 3);
                assert!(matches!(signal.reason, InsufficientReason::FitFailed(_)));
            }
            other => panic!("expected fit failure, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ForecastConfig {
            interval_width: 1.5,
            ..ForecastConfig::default()
        };
        assert!(ForecastEngine::new(config).is_err());
    }

    #[test]
    fn test_forecast_is_deterministic() {
        let transactions = synthetic_history("X", 90, 9);
        let first = forecast(&transactions, "X", 10).unwrap();
        let second = forecast(&transactions, "X", 10).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_seasonalities_follow_flags() {
        let config = ForecastConfig {
            yearly_seasonality: false,
            ..ForecastConfig::default()
        };
        let terms = config.seasonalities();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].name, "weekly");
        assert_eq!(terms[0].order, 3);
    }
}
