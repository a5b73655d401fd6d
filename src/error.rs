use std::path::PathBuf;

use thiserror::Error;

/// Every failure the analysis can surface.
///
/// Validation variants (`InvalidLagTime`, `UnsupportedModel`, `DegenerateSignal`,
/// `CalibrationUndersized`, `TypeMismatch`, `InvalidInput`) are raised before any
/// FFT or fitting work starts.
#[derive(Debug, Error)]
pub enum DdmError {
    #[error("Invalid lag time {tau}: must satisfy 1 <= tau < {frames} (number of frames).")]
    InvalidLagTime { tau: usize, frames: usize },

    #[error("'{name}' is not a supported fitting model. Supported models are: {}.", .supported.join(", "))]
    UnsupportedModel {
        name: String,
        supported: Vec<&'static str>,
    },

    #[error("{cause} ({statistic:.4} < {threshold}); exponential decorrelation models cannot be fitted.")]
    DegenerateSignal {
        cause: Degeneracy,
        statistic: f64,
        threshold: f64,
    },

    #[error("Fit of model {model} did not converge: {reason}")]
    FitNonConvergence { model: &'static str, reason: String },

    #[error(
        "Radial profile has {bins} bins but the noise-floor estimate needs at least {required}; \
         use larger frames."
    )]
    CalibrationUndersized { bins: usize, required: usize },

    #[error("Unsupported input for execution: {0}")]
    TypeMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Matrix build cancelled before completion.")]
    Cancelled,

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Stored matrix comes from '{stored}' but new data comes from '{incoming}'.")]
    SourceMismatch { stored: String, incoming: String },

    #[error("{context} '{}': {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Format error: {0}")]
    Format(String),
}

impl DdmError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Process exit code for the `ddm` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            DdmError::InvalidLagTime { .. }
            | DdmError::UnsupportedModel { .. }
            | DdmError::TypeMismatch(_)
            | DdmError::InvalidInput(_)
            | DdmError::SourceMismatch { .. } => 2,
            DdmError::DegenerateSignal { .. }
            | DdmError::FitNonConvergence { .. }
            | DdmError::CalibrationUndersized { .. } => 3,
            DdmError::ResourceExhausted(_) | DdmError::Io { .. } | DdmError::Format(_) => 4,
            DdmError::Cancelled => 130,
        }
    }
}

/// What made a curve unfittable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degeneracy {
    /// A straight line through the endpoints explains the ISF.
    Linear,
    /// `A(q)` is not resolved above the noise floor `B`.
    WeakAmplitude,
}

impl std::fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degeneracy::Linear => {
                f.write_str("The ISF fits well to a straight line, implying very little decorrelation")
            }
            Degeneracy::WeakAmplitude => f.write_str("The amplitude A(q) is lost in the noise floor B"),
        }
    }
}

pub type Result<T, E = DdmError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_model_message_lists_names() {
        let err = DdmError::UnsupportedModel {
            name: "foo".into(),
            supported: vec!["single-exponential", "double-exponential", "schultz"],
        };
        let msg = err.to_string();
        assert!(msg.contains("foo"));
        assert!(msg.contains("single-exponential, double-exponential, schultz"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn cancellation_has_distinct_exit_code() {
        assert_eq!(DdmError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn degenerate_signal_names_its_cause() {
        let err = DdmError::DegenerateSignal {
            cause: Degeneracy::WeakAmplitude,
            statistic: 0.02,
            threshold: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("noise floor"), "{msg}");
        assert!(msg.contains("0.0200 < 0.5"), "{msg}");
        assert_eq!(err.exit_code(), 3);
    }
}
