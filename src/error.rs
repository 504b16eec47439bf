//! Error types for the segmentation and forecasting engines

use thiserror::Error;

/// Errors surfaced to callers of the analytical engines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Grand total value is zero (or not finite), so cumulative shares are undefined
    #[error("Degenerate input: grand total value is {total}, cumulative shares are undefined")]
    DegenerateInput { total: f64 },

    /// Malformed arguments supplied by the caller
    #[error("Contract violation on '{argument}': {reason}")]
    ContractViolation { argument: String, reason: String },
}

impl AnalysisError {
    pub(crate) fn contract(argument: &str, reason: impl Into<String>) -> Self {
        AnalysisError::ContractViolation {
            argument: argument.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures while fitting or evaluating the seasonal model.
///
/// These never escape [`crate::forecast`]; they are converted into an
/// insufficient-data outcome at the forecast boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Cannot fit a model to an empty history")]
    EmptyHistory,

    #[error("Normal equations of size {size} are not positive definite")]
    Singular { size: usize },

    #[error("Non-finite value encountered during {0}")]
    NonFinite(&'static str),

    #[error("Fit did not converge after {iterations} iterations (last relative change {change:.3e})")]
    NotConverged { iterations: usize, change: f64 },

    #[error("Fitted {0} left the plausible range")]
    Implausible(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_input_message() {
        let error = AnalysisError::DegenerateInput { total: 0.0 };
        assert_eq!(
            error.to_string(),
            "Degenerate input: grand total value is 0, cumulative shares are undefined"
        );
    }

    #[test]
    fn test_contract_violation_message() {
        let error = AnalysisError::contract("horizon_days", "must be positive");
        assert_eq!(
            error.to_string(),
            "Contract violation on 'horizon_days': must be positive"
        );
    }

    #[test]
    fn test_model_error_messages() {
        assert_eq!(
            ModelError::Singular { size: 3 }.to_string(),
            "Normal equations of size 3 are not positive definite"
        );
        assert!(ModelError::NotConverged {
            iterations: 200,
            change: 0.5
        }
        .to_string()
        .contains("200 iterations"));
        assert_eq!(
            ModelError::Implausible("trend").to_string(),
            "Fitted trend left the plausible range"
        );
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnalysisError>();
        assert_send_sync::<ModelError>();
    }
}
