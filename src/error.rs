//! # Errors
//!
//! $$
//! \text{stage}: \text{input} \to \text{output} \;\lor\; \text{typed failure}
//! $$
//!
//! Every stage fails fast with the offending asset or parameter named; no stage
//! hands NaN to the next one.

use thiserror::Error;

/// Failure kinds of the allocation pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
  /// Empty, misaligned or otherwise malformed input.
  #[error("data shape error: {0}")]
  DataShape(String),
  /// A value left the numerically valid domain (bad correlation, zero variance, NaN).
  #[error("numerical instability at asset {index}: {reason}")]
  NumericalInstability { index: usize, reason: String },
  /// The risk-budget solver did not reach its tolerance for a risk-aversion level.
  #[error("optimization failed for gamma = {gamma} after {iterations} iterations: {reason}")]
  OptimizationFailure {
    gamma: f64,
    iterations: u64,
    reason: String,
  },
  /// Clustering needs at least two assets.
  #[error("degenerate tree: clustering needs at least 2 assets, got {assets}")]
  DegenerateTree { assets: usize },
  /// A configuration value is outside its domain.
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),
}

impl AllocationError {
  pub(crate) fn unstable(index: usize, reason: impl Into<String>) -> Self {
    Self::NumericalInstability {
      index,
      reason: reason.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, AllocationError>;
