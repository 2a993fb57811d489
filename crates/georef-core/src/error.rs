use std::fmt;

use crate::Channel;

/// Processing stage a failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Normalization,
    Fit,
    Partition,
    Correction,
    Resample,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Normalization => "normalization",
            Stage::Fit => "fit",
            Stage::Partition => "partition",
            Stage::Correction => "correction",
            Stage::Resample => "resample",
        };
        f.write_str(name)
    }
}

/// Errors returned by the fitting, correction and resampling engine.
///
/// Cancellation of a resample is not an error; see
/// [`ResampleOutcome::Cancelled`](crate::ResampleOutcome::Cancelled).
#[derive(thiserror::Error, Debug)]
pub enum GeorefError {
    #[error("{stage}: insufficient data (need at least {needed} {what}, got {got})")]
    InsufficientData {
        stage: Stage,
        what: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("normalization: zero or non-finite statistics on channel {channel}")]
    DegenerateAxis { channel: Channel },
    #[error("correction: singular {size}x{size} distance matrix (duplicate control points?)")]
    SingularMatrix { size: usize },
    #[error("resample: invalid source image ({0})")]
    InvalidImage(String),
    #[error("{stage}: invalid parameter ({message})")]
    InvalidParameter { stage: Stage, message: String },
    #[error("{stage}: length mismatch (expected {expected}, got {got})")]
    DimensionMismatch {
        stage: Stage,
        expected: usize,
        got: usize,
    },
    #[error("fit: least-squares solve failed ({0})")]
    LeastSquares(&'static str),
    #[error("resample: worker thread panicked")]
    WorkerPanicked,
}

impl GeorefError {
    pub(crate) fn insufficient(stage: Stage, what: &'static str, needed: usize, got: usize) -> Self {
        Self::InsufficientData {
            stage,
            what,
            needed,
            got,
        }
    }

    pub(crate) fn invalid(stage: Stage, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            stage,
            message: message.into(),
        }
    }

    /// The stage the failure originated in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InsufficientData { stage, .. }
            | Self::InvalidParameter { stage, .. }
            | Self::DimensionMismatch { stage, .. } => *stage,
            Self::DegenerateAxis { .. } => Stage::Normalization,
            Self::SingularMatrix { .. } => Stage::Correction,
            Self::InvalidImage(_) | Self::WorkerPanicked => Stage::Resample,
            Self::LeastSquares(_) => Stage::Fit,
        }
    }
}

pub type Result<T, E = GeorefError> = std::result::Result<T, E>;
