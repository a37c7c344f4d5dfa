//! # Cluster Similarity
//!
//! $$
//! \bar D_{ab}=h\big(\operatorname{lca}(a,b)\big),\qquad
//! \bar S_{ab}=\frac{1}{N}\Big(1-\frac{\bar D_{ab}^2}{k}\Big)
//! $$
//!
//! Merge-height (cophenetic) matrix of a linkage and its closeness transform.

use ndarray::Array2;

use super::linkage::Linkage;
use crate::error::AllocationError;
use crate::error::Result;

/// `N x N` matrix whose `(a, b)` entry is the height of the first merge holding both `a` and `b`.
///
/// The diagonal is zero.
pub fn similarity_matrix(linkage: &Linkage) -> Array2<f64> {
  let n = linkage.n_leaves();
  let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
  members.reserve(n - 1);
  let mut heights = Array2::<f64>::zeros((n, n));

  for rec in linkage.records() {
    for &a in &members[rec.left] {
      for &b in &members[rec.right] {
        heights[[a, b]] = rec.height;
        heights[[b, a]] = rec.height;
      }
    }
    let mut merged = members[rec.left].clone();
    merged.extend_from_slice(&members[rec.right]);
    members.push(merged);
  }

  heights
}

/// Closeness `(1 - d^2 / k) / N` of a merge-height matrix.
///
/// `k` is the scale used for the correlation distance, so a height of zero maps to
/// `1 / N` and a height of `sqrt(k)` maps to zero.
pub fn closeness(heights: &Array2<f64>, k: f64) -> Result<Array2<f64>> {
  if !(k.is_finite() && k > 0.0) {
    return Err(AllocationError::InvalidParameter(format!(
      "distance scale must be finite and positive, got {k}"
    )));
  }
  let (rows, cols) = heights.dim();
  if rows != cols || rows == 0 {
    return Err(AllocationError::DataShape(format!(
      "similarity matrix must be square and non-empty, got {rows}x{cols}"
    )));
  }
  let n = rows as f64;
  Ok(heights.mapv(|d| (1.0 - d * d / k) / n))
}
