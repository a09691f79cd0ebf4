//! Error types for the ssm-kalman crate.

use std::fmt;

/// Classifies a numerical linear-algebra failure inside the filter kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinAlgKind {
    /// A Cholesky factorization of the forecast-error covariance failed
    /// (the matrix is not positive definite).
    NotPositiveDefinite,
    /// An LU factorization found a zero pivot, or a scalar forecast-error
    /// variance was exactly zero.
    Singular,
    /// An operation received arguments it cannot handle. This indicates a
    /// bug in the caller, never an expected data condition.
    InvalidArgument,
}

impl fmt::Display for LinAlgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinAlgKind::NotPositiveDefinite => "matrix is not positive definite",
            LinAlgKind::Singular => "matrix is singular",
            LinAlgKind::InvalidArgument => "invalid argument",
        };
        f.write_str(s)
    }
}

/// Error type for all fallible operations in the ssm-kalman crate.
///
/// This enum covers construction-time shape validation, initialization
/// requirements, per-period numerical failures, and driver termination.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KalmanError {
    /// Returned when a system matrix or vector has the wrong shape.
    #[error("{name} has invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Name of the offending input.
        name: &'static str,
        /// The shape the container requires.
        expected: String,
        /// The shape that was supplied.
        got: String,
    },

    /// Returned when the recursion is driven before the container has an
    /// initial state distribution.
    #[error("state-space model is not initialized")]
    NotInitialized,

    /// Returned when a configuration bitmask holds an unsupported value.
    #[error("invalid method: {name} = {value:#04x}")]
    InvalidMethod {
        /// Which configuration field was rejected.
        name: &'static str,
        /// The rejected bitmask value.
        value: u32,
    },

    /// Returned when a factorization or inversion fails during filtering.
    ///
    /// The workspace retains results through period `period - 1`; the
    /// caller must `seek` before resuming.
    #[error("linear algebra failure at period {period}: {kind}")]
    LinAlg {
        /// The period being filtered when the failure occurred.
        period: usize,
        /// What went wrong.
        kind: LinAlgKind,
    },

    /// Returned by `step()` once every observation has been consumed, and
    /// by `seek()` for an out-of-range target. A benign termination signal
    /// for callers driving the filter one period at a time.
    #[error("filter advanced past the end of the observation sequence (nobs = {nobs})")]
    EndOfSequence {
        /// Length of the observation sequence.
        nobs: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_invalid_shape() {
        let err = KalmanError::InvalidShape {
            name: "design",
            expected: "(2, 3, 1)".into(),
            got: "(2, 2, 1)".into(),
        };
        assert_eq!(
            err.to_string(),
            "design has invalid shape: expected (2, 3, 1), got (2, 2, 1)"
        );
    }

    #[test]
    fn error_not_initialized() {
        let err = KalmanError::NotInitialized;
        assert_eq!(err.to_string(), "state-space model is not initialized");
    }

    #[test]
    fn error_invalid_method() {
        let err = KalmanError::InvalidMethod {
            name: "filter_method",
            value: 0x08,
        };
        assert_eq!(err.to_string(), "invalid method: filter_method = 0x08");
    }

    #[test]
    fn error_linalg() {
        let err = KalmanError::LinAlg {
            period: 17,
            kind: LinAlgKind::NotPositiveDefinite,
        };
        assert_eq!(
            err.to_string(),
            "linear algebra failure at period 17: matrix is not positive definite"
        );

        let err = KalmanError::LinAlg {
            period: 3,
            kind: LinAlgKind::Singular,
        };
        assert_eq!(
            err.to_string(),
            "linear algebra failure at period 3: matrix is singular"
        );
    }

    #[test]
    fn error_end_of_sequence() {
        let err = KalmanError::EndOfSequence { nobs: 100 };
        assert_eq!(
            err.to_string(),
            "filter advanced past the end of the observation sequence (nobs = 100)"
        );
    }

    #[test]
    fn error_is_std_error() {
        fn assert_impl<T: std::error::Error>() {}
        assert_impl::<KalmanError>();
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_impl<T: Send + Sync>() {}
        assert_impl::<KalmanError>();
    }
}
