//! Seasonal decomposition model with multiplicative seasonality
//!
//! The scaled series is modelled as `y(t) = g(t) * (1 + s(t)) + e` where
//! `g` is a piecewise-linear trend with rate changes at fixed changepoints
//! and `s` is a sum of Fourier series (weekly and yearly). Seasonal features
//! are centred over the history, so `s` averages to zero there and `g`
//! carries the level. Starting from a trend-only ridge fit, all parameters are
//! refined jointly with damped Gauss-Newton steps on the penalised
//! least-squares objective.

use chrono::{Datelike, NaiveDate};
use ndarray::{s, Array1, Array2, Axis};
use std::f64::consts::PI;

use crate::error::ModelError;
use crate::forecast::ForecastConfig;

/// Ridge penalty on the base slope and offset: a normal(0, 5) prior in scaled units
const BASE_PENALTY: f64 = 1.0 / 25.0;

/// Largest trend or prediction magnitude accepted, in multiples of the peak observation
const PLAUSIBLE_RANGE: f64 = 5.0;

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e12;

/// A Fourier seasonal term
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seasonality {
    pub name: &'static str,
    /// Period in days
    pub period: f64,
    /// Number of sine/cosine pairs
    pub order: usize,
}

impl Seasonality {
    pub const fn weekly(order: usize) -> Self {
        Self {
            name: "weekly",
            period: 7.0,
            order,
        }
    }

    pub const fn yearly(order: usize) -> Self {
        Self {
            name: "yearly",
            period: 365.25,
            order,
        }
    }

    fn width(&self) -> usize {
        2 * self.order
    }
}

/// Model output for a single date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
    pub trend: f64,
}

/// Fitted trend + multiplicative seasonality model
#[derive(Debug, Clone)]
pub struct SeasonalModel {
    origin: NaiveDate,
    span_days: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    seasonalities: Vec<Seasonality>,
    /// `[slope, offset, delta_1..delta_J]`
    trend_params: Array1<f64>,
    /// Column means of the seasonal features over the history
    seasonal_means: Array1<f64>,
    seasonal_params: Array1<f64>,
    /// Residual standard deviation in scaled units
    sigma: f64,
    /// Mean absolute rate change, drives widening of future intervals
    delta_scale: f64,
    z: f64,
    iterations: usize,
}

impl SeasonalModel {
    /// Fit the model to observed daily values
    ///
    /// # Arguments
    /// * `dates` - Observation dates, ascending and distinct
    /// * `values` - Observed value for each date
    /// * `config` - Seasonality, prior and convergence settings
    pub fn fit(
        dates: &[NaiveDate],
        values: &[f64],
        config: &ForecastConfig,
    ) -> Result<Self, ModelError> {
        let n = dates.len().min(values.len());
        if n == 0 {
            return Err(ModelError::EmptyHistory);
        }
        let dates = &dates[..n];

        let origin = dates[0];
        let span_days = match (dates[n - 1] - origin).num_days() {
            0 => 1.0,
            days => days as f64,
        };

        let y_scale = match values[..n].iter().fold(0.0_f64, |acc, v| acc.max(v.abs())) {
            m if m > 0.0 => m,
            _ => 1.0,
        };
        let y = Array1::from_iter(values[..n].iter().map(|v| v / y_scale));
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("scaling"));
        }

        let t: Vec<f64> = dates
            .iter()
            .map(|d| (*d - origin).num_days() as f64 / span_days)
            .collect();

        let changepoints = place_changepoints(&t, config.n_changepoints, config.changepoint_range);
        let seasonalities = config.seasonalities();

        let z_design = trend_design(&t, &changepoints);
        let x_design = seasonal_design(dates, &seasonalities);
        let seasonal_means = x_design
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x_design.ncols()));
        let x_design = &x_design - &seasonal_means;

        let mut trend_penalty = vec![BASE_PENALTY, BASE_PENALTY];
        trend_penalty.extend(
            std::iter::repeat(1.0 / config.changepoint_prior_scale.powi(2)).take(changepoints.len()),
        );
        let seasonal_penalty =
            vec![1.0 / config.seasonality_prior_scale.powi(2); x_design.ncols()];

        let n_trend = z_design.ncols();
        let n_seasonal = x_design.ncols();
        let lambdas: Vec<f64> = trend_penalty.iter().chain(&seasonal_penalty).copied().collect();

        // Start from the trend alone, seasonal multiplier fixed at one
        let mut params = Array1::<f64>::zeros(n_trend + n_seasonal);
        params
            .slice_mut(s![..n_trend])
            .assign(&ridge(&z_design, &y, &trend_penalty)?);

        let mut objective = objective_at(&params, &z_design, &x_design, &y, &lambdas);
        if !objective.is_finite() {
            return Err(ModelError::NonFinite("initial trend"));
        }

        let mut damping = INITIAL_DAMPING;
        let mut change = f64::INFINITY;
        let mut iterations = 0;
        let mut converged = n_seasonal == 0 || objective <= 1e-14;

        while !converged && iterations < config.max_iterations {
            iterations += 1;

            let trend = z_design.dot(&params.slice(s![..n_trend]));
            let multiplier = x_design.dot(&params.slice(s![n_trend..])) + 1.0;
            let residual = &y - &(&trend * &multiplier);

            // Jacobian of g * (1 + s) with respect to [trend params, seasonal params]
            let mut jacobian = Array2::<f64>::zeros((y.len(), n_trend + n_seasonal));
            jacobian
                .slice_mut(s![.., ..n_trend])
                .assign(&scale_rows(&z_design, &multiplier));
            jacobian
                .slice_mut(s![.., n_trend..])
                .assign(&scale_rows(&x_design, &trend));

            let mut gram = jacobian.t().dot(&jacobian);
            for (j, lambda) in lambdas.iter().enumerate() {
                gram[[j, j]] += lambda;
            }
            let penalty_grad = Array1::from_iter(params.iter().zip(&lambdas).map(|(p, l)| l * p));
            let gradient = jacobian.t().dot(&residual) - penalty_grad;

            // Levenberg-Marquardt: raise damping until the step lowers the objective
            let accepted = loop {
                let mut damped = gram.clone();
                for j in 0..damped.nrows() {
                    damped[[j, j]] *= 1.0 + damping;
                }
                // A failed factorisation is treated like a rejected step
                if let Ok(step) = solve_cholesky(damped, gradient.clone()) {
                    let candidate = &params + &step;
                    let candidate_objective =
                        objective_at(&candidate, &z_design, &x_design, &y, &lambdas);

                    if candidate_objective.is_finite() && candidate_objective <= objective {
                        damping = (damping / 10.0).max(MIN_DAMPING);
                        break Some((candidate, candidate_objective));
                    }
                }
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    break None;
                }
            };

            match accepted {
                Some((candidate, candidate_objective)) => {
                    change = (objective - candidate_objective) / objective.max(f64::MIN_POSITIVE);
                    params = candidate;
                    objective = candidate_objective;
                    converged = change <= config.tolerance || objective <= 1e-14;
                }
                // No descent direction left at any damping: already at the minimum
                None => {
                    change = 0.0;
                    converged = true;
                }
            }
        }

        if !converged {
            return Err(ModelError::NotConverged { iterations, change });
        }

        let trend_params = params.slice(s![..n_trend]).to_owned();
        let seasonal_params = params.slice(s![n_trend..]).to_owned();
        let trend = z_design.dot(&trend_params);
        let multiplier = x_design.dot(&seasonal_params) + 1.0;
        let residual = &y - &(&trend * &multiplier);
        let sigma = (residual.dot(&residual) / n as f64).sqrt();

        let deltas = trend_params.slice(s![2..]);
        let delta_scale = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().map(|d| d.abs()).sum::<f64>() / deltas.len() as f64
        };

        let model = SeasonalModel {
            origin,
            span_days,
            y_scale,
            changepoints,
            seasonalities,
            trend_params,
            seasonal_means,
            seasonal_params,
            sigma,
            delta_scale,
            z: z_for_width(config.interval_width),
            iterations,
        };

        if !model.sigma.is_finite() || model.trend_params.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite("parameters"));
        }
        // A trend far above every observation means the seasonal factor is cancelling it
        if trend.iter().any(|g| g.abs() > PLAUSIBLE_RANGE) {
            return Err(ModelError::Implausible("trend"));
        }

        Ok(model)
    }

    /// Number of Gauss-Newton iterations the fit needed
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn seasonalities(&self) -> &[Seasonality] {
        &self.seasonalities
    }

    /// Predict for a batch of dates
    pub fn predict(&self, dates: &[NaiveDate]) -> Result<Vec<Prediction>, ModelError> {
        let predictions: Vec<Prediction> = dates.iter().map(|d| self.predict_one(*d)).collect();
        if predictions
            .iter()
            .any(|p| !(p.predicted.is_finite() && p.lower.is_finite() && p.upper.is_finite()))
        {
            return Err(ModelError::NonFinite("prediction"));
        }

        let limit = PLAUSIBLE_RANGE * self.y_scale;
        if predictions.iter().any(|p| p.trend.abs() > limit) {
            return Err(ModelError::Implausible("trend"));
        }
        if predictions.iter().any(|p| p.predicted.abs() > limit) {
            return Err(ModelError::Implausible("prediction"));
        }
        Ok(predictions)
    }

    fn predict_one(&self, date: NaiveDate) -> Prediction {
        let t = (date - self.origin).num_days() as f64 / self.span_days;

        let trend = trend_row(t, &self.changepoints).dot(&self.trend_params);
        let features = seasonal_row(date, &self.seasonalities) - &self.seasonal_means;
        let multiplier = 1.0 + features.dot(&self.seasonal_params);

        let predicted = trend * multiplier;

        // Rate changes keep arriving after the history ends at the fitted frequency
        let trend_sd = if t > 1.0 {
            let rate = self.changepoints.len() as f64;
            (2.0 * rate * self.delta_scale.powi(2) * (t - 1.0).powi(3) / 3.0).sqrt()
        } else {
            0.0
        };
        let spread = self.z * (self.sigma.powi(2) + (multiplier * trend_sd).powi(2)).sqrt();

        Prediction {
            predicted: predicted * self.y_scale,
            lower: (predicted - spread) * self.y_scale,
            upper: (predicted + spread) * self.y_scale,
            trend: trend * self.y_scale,
        }
    }
}

/// Changepoints at evenly spaced observations within the first `range` of history
fn place_changepoints(t: &[f64], requested: usize, range: f64) -> Vec<f64> {
    let hist_size = (t.len() as f64 * range).floor() as usize;
    let count = requested.min(hist_size.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }

    let last = (hist_size - 1) as f64;
    (1..=count)
        .map(|j| {
            let idx = (j as f64 * last / count as f64).round() as usize;
            t[idx.min(t.len() - 1)]
        })
        .collect()
}

fn trend_row(t: f64, changepoints: &[f64]) -> Array1<f64> {
    let mut row = Vec::with_capacity(2 + changepoints.len());
    row.push(t);
    row.push(1.0);
    row.extend(changepoints.iter().map(|&s| (t - s).max(0.0)));
    Array1::from(row)
}

fn trend_design(t: &[f64], changepoints: &[f64]) -> Array2<f64> {
    let width = 2 + changepoints.len();
    let mut design = Array2::zeros((t.len(), width));
    for (i, &ti) in t.iter().enumerate() {
        design.row_mut(i).assign(&trend_row(ti, changepoints));
    }
    design
}

fn seasonal_row(date: NaiveDate, seasonalities: &[Seasonality]) -> Array1<f64> {
    // Absolute day number keeps phases tied to the calendar, not the history start
    let day = date.num_days_from_ce() as f64;
    let mut row = Vec::with_capacity(seasonalities.iter().map(Seasonality::width).sum());
    for season in seasonalities {
        for k in 1..=season.order {
            let angle = 2.0 * PI * k as f64 * day / season.period;
            row.push(angle.sin());
            row.push(angle.cos());
        }
    }
    Array1::from(row)
}

fn seasonal_design(dates: &[NaiveDate], seasonalities: &[Seasonality]) -> Array2<f64> {
    let width: usize = seasonalities.iter().map(Seasonality::width).sum();
    let mut design = Array2::zeros((dates.len(), width));
    if width == 0 {
        return design;
    }
    for (i, date) in dates.iter().enumerate() {
        design.row_mut(i).assign(&seasonal_row(*date, seasonalities));
    }
    design
}

fn objective_at(
    params: &Array1<f64>,
    z_design: &Array2<f64>,
    x_design: &Array2<f64>,
    y: &Array1<f64>,
    lambdas: &[f64],
) -> f64 {
    let n_trend = z_design.ncols();
    let trend = z_design.dot(&params.slice(s![..n_trend]));
    let multiplier = x_design.dot(&params.slice(s![n_trend..])) + 1.0;
    let residual = y - &(&trend * &multiplier);
    residual.dot(&residual) + penalty(params, lambdas)
}

fn scale_rows(matrix: &Array2<f64>, weights: &Array1<f64>) -> Array2<f64> {
    let mut scaled = matrix.clone();
    for (mut row, &w) in scaled.rows_mut().into_iter().zip(weights.iter()) {
        row *= w;
    }
    scaled
}

fn penalty(params: &Array1<f64>, lambdas: &[f64]) -> f64 {
    params
        .iter()
        .zip(lambdas)
        .map(|(p, lambda)| lambda * p * p)
        .sum()
}

/// Minimise `|design * x - target|^2 + sum(lambda_j * x_j^2)`
fn ridge(
    design: &Array2<f64>,
    target: &Array1<f64>,
    lambdas: &[f64],
) -> Result<Array1<f64>, ModelError> {
    let mut gram = design.t().dot(design);
    for (j, lambda) in lambdas.iter().enumerate().take(gram.nrows()) {
        gram[[j, j]] += lambda;
    }
    let rhs = design.t().dot(target);
    solve_cholesky(gram, rhs)
}

/// Solve `a * x = b` for symmetric positive definite `a`
fn solve_cholesky(a: Array2<f64>, b: Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let size = a.nrows();
    let mut lower = Array2::<f64>::zeros((size, size));

    for i in 0..size {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= lower[[i, k]] * lower[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) {
                    return Err(ModelError::Singular { size });
                }
                lower[[i, i]] = sum.sqrt();
            } else {
                lower[[i, j]] = sum / lower[[j, j]];
            }
        }
    }

    // Forward substitution: L y = b
    let mut y = Array1::<f64>::zeros(size);
    for i in 0..size {
        let mut sum = b[i];
        for k in 0..i {
            sum -= lower[[i, k]] * y[k];
        }
        y[i] = sum / lower[[i, i]];
    }

    // Back substitution: L^T x = y
    let mut x = Array1::<f64>::zeros(size);
    for i in (0..size).rev() {
        let mut sum = y[i];
        for k in (i + 1)..size {
            sum -= lower[[k, i]] * x[k];
        }
        x[i] = sum / lower[[i, i]];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("linear solve"));
    }
    Ok(x)
}

/// Two-sided standard normal quantile for a central interval of the given width
///
/// Rational approximation (Abramowitz & Stegun 26.2.23), absolute error below 4.5e-4.
pub fn z_for_width(width: f64) -> f64 {
    let tail = ((1.0 - width) / 2.0).clamp(1e-12, 0.5);
    let t = (-2.0 * tail.ln()).sqrt();
    let numerator = 2.515517 + 0.802853 * t + 0.010328 * t * t;
    let denominator = 1.0 + 1.432788 * t + 0.189269 * t * t + 0.001308 * t * t * t;
    (t - numerator / denominator).max(0.0)
}
