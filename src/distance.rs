//! # Correlation Distance
//!
//! $$
//! d_{ij}=\sqrt{\tfrac12(1-\rho_{ij})},\qquad
//! \tilde d_{ij}=\Big(\sum_{k=1}^{N}(d_{ik}-d_{jk})^2\Big)^{1/2}
//! $$
//!
//! Mantegna distance and its second-order Euclidean embedding in condensed form.

use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use crate::error::AllocationError;
use crate::error::Result;

/// How far a correlation may leave `[-1, 1]` before it is treated as broken input.
pub const CORRELATION_TOLERANCE: f64 = 1e-9;

/// Scale constant `k` in `d = sqrt(k (1 - rho))`.
pub const MANTEGNA_SCALE: f64 = 0.5;

/// Upper-triangular flattening of a symmetric `N x N` dissimilarity matrix.
///
/// Pair `(i, j)` with `i < j` lives at `N i - i (i + 1) / 2 + (j - i - 1)`.
#[derive(Clone, Debug, PartialEq)]
pub struct CondensedDistance {
  n: usize,
  values: Vec<f64>,
}

impl CondensedDistance {
  /// Wrap an already condensed vector of length `N (N - 1) / 2`.
  pub fn new(n: usize, values: Vec<f64>) -> Result<Self> {
    let expected = n * n.saturating_sub(1) / 2;
    if values.len() != expected {
      return Err(AllocationError::DataShape(format!(
        "condensed vector for {n} items needs {expected} entries, got {}",
        values.len()
      )));
    }
    if let Some(k) = values.iter().position(|v| !v.is_finite() || *v < 0.0) {
      let (i, _) = pair_of(n, k);
      return Err(AllocationError::unstable(
        i,
        format!("invalid dissimilarity {}", values[k]),
      ));
    }
    Ok(Self { n, values })
  }

  /// Condense a square dissimilarity matrix, reading its upper triangle.
  pub fn from_square(matrix: &Array2<f64>) -> Result<Self> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
      return Err(AllocationError::DataShape(format!(
        "dissimilarity matrix must be square, got {rows}x{cols}"
      )));
    }
    let mut values = Vec::with_capacity(rows * rows.saturating_sub(1) / 2);
    for i in 0..rows {
      for j in (i + 1)..rows {
        values.push(matrix[[i, j]]);
      }
    }
    Self::new(rows, values)
  }

  /// Number of items the vector describes.
  pub fn n(&self) -> usize {
    self.n
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Dissimilarity between items `i` and `j`; zero on the diagonal.
  pub fn get(&self, i: usize, j: usize) -> f64 {
    match i.cmp(&j) {
      std::cmp::Ordering::Equal => 0.0,
      std::cmp::Ordering::Less => self.values[condensed_index(self.n, i, j)],
      std::cmp::Ordering::Greater => self.values[condensed_index(self.n, j, i)],
    }
  }

  /// Expand back into the symmetric square form.
  pub fn to_square(&self) -> Array2<f64> {
    Array2::from_shape_fn((self.n, self.n), |(i, j)| self.get(i, j))
  }
}

/// Position of pair `(i, j)`, `i < j`, in a condensed vector over `n` items.
pub fn condensed_index(n: usize, i: usize, j: usize) -> usize {
  debug_assert!(i < j && j < n);
  n * i - i * (i + 1) / 2 + (j - i - 1)
}

fn pair_of(n: usize, k: usize) -> (usize, usize) {
  let mut offset = 0;
  for i in 0..n {
    let row = n - i - 1;
    if k < offset + row {
      return (i, i + 1 + (k - offset));
    }
    offset += row;
  }
  (n, n)
}

/// Mantegna distance `sqrt(0.5 (1 - rho))` of a correlation matrix.
///
/// Correlations within [`CORRELATION_TOLERANCE`] of the unit interval are clamped
/// back into it; anything further out would give a negative radicand and fails.
pub fn correlation_distance(corr: &Array2<f64>) -> Result<Array2<f64>> {
  let (rows, cols) = corr.dim();
  if rows != cols || rows == 0 {
    return Err(AllocationError::DataShape(format!(
      "correlation matrix must be square and non-empty, got {rows}x{cols}"
    )));
  }

  let mut dist = Array2::<f64>::zeros((rows, cols));
  for i in 0..rows {
    for j in 0..cols {
      if i == j {
        continue;
      }
      let rho = corr[[i, j]];
      if !rho.is_finite() || rho.abs() > 1.0 + CORRELATION_TOLERANCE {
        return Err(AllocationError::unstable(
          i,
          format!("correlation {rho} with asset {j} is outside [-1, 1]"),
        ));
      }
      if rho.abs() > 1.0 {
        warn!(i, j, rho, "correlation clamped into [-1, 1]");
      }
      dist[[i, j]] = (MANTEGNA_SCALE * (1.0 - rho.clamp(-1.0, 1.0))).sqrt();
    }
  }

  Ok(dist)
}

/// Pairwise Euclidean distance between the rows of a distance matrix.
///
/// Row `i` is the distance profile of asset `i` against the whole universe, so the
/// result compares how two assets relate to everything else rather than to each
/// other only.
pub fn euclidean_embedding(dist: &Array2<f64>) -> Result<CondensedDistance> {
  let (rows, cols) = dist.dim();
  if rows != cols {
    return Err(AllocationError::DataShape(format!(
      "distance matrix must be square, got {rows}x{cols}"
    )));
  }

  for (i, row) in dist.outer_iter().enumerate() {
    if row.iter().any(|v| !v.is_finite()) {
      return Err(AllocationError::unstable(i, "non-finite distance row"));
    }
  }

  let mut values = Vec::with_capacity(rows * rows.saturating_sub(1) / 2);
  for i in 0..rows {
    let row_i = dist.row(i);
    for j in (i + 1)..rows {
      let sq: f64 = row_i
        .iter()
        .zip(dist.row(j).iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum();
      values.push(sq.sqrt());
    }
  }

  debug!(assets = rows, pairs = values.len(), "euclidean embedding computed");
  CondensedDistance::new(rows, values)
}
