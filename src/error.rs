//! Error types.
//!
//! - `FitError`: a single fit attempt failed (mostly recoverable by the controller)
//! - `MeasureError`: a measurement call cannot proceed at all
//! - `AppError`: what the binary reports, carrying a process exit code

use thiserror::Error;

/// Failure of one model fit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("invalid fit input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {samples} sample(s) for {params} parameter(s)")]
    InsufficientData { samples: usize, params: usize },

    #[error("fit did not converge after {evaluations} function evaluations")]
    DidNotConverge { evaluations: usize },

    #[error("singular jacobian")]
    SingularJacobian,
}

impl FitError {
    /// Whether the controller may retry with a different excitation period.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FitError::InvalidInput(_))
    }
}

/// Failure of a whole measurement call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasureError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("trace source failed: {0}")]
    Source(String),
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<MeasureError> for AppError {
    fn from(err: MeasureError) -> Self {
        let code = match err {
            MeasureError::InvalidParameter(_) => 2,
            MeasureError::Source(_) => 3,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match err {
            FitError::InvalidInput(_) => 2,
            _ => 4,
        };
        AppError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let invalid: AppError = MeasureError::InvalidParameter("R=0".into()).into();
        assert_eq!(invalid.exit_code(), 2);
        let source: AppError = MeasureError::Source("io".into()).into();
        assert_eq!(source.exit_code(), 3);
        let fit: AppError = FitError::SingularJacobian.into();
        assert_eq!(fit.exit_code(), 4);
    }

    #[test]
    fn invalid_input_is_not_recoverable() {
        assert!(!FitError::InvalidInput("x".into()).is_recoverable());
        assert!(FitError::DidNotConverge { evaluations: 5000 }.is_recoverable());
        assert!(FitError::InsufficientData { samples: 1, params: 2 }.is_recoverable());
    }
}
