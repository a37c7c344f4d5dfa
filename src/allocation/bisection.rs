//! # Recursive Bisection
//!
//! $$
//! \alpha = 1-\frac{V_L}{V_L+V_R},\qquad V_C=\mathbf w_C^\top\Sigma_C\mathbf w_C,\quad
//! \mathbf w_C\propto\operatorname{diag}(\Sigma_C)^{-1}
//! $$
//!
//! Hierarchical Risk Parity (Lopez de Prado) top-down allocation over a
//! quasi-diagonal leaf order.

use std::collections::VecDeque;
use std::ops::Range;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use tracing::debug;

use super::types::HierarchicalWeights;
use crate::data::MIN_VARIANCE;
use crate::error::AllocationError;
use crate::error::Result;

/// Split a range of the leaf order in two; the left half gets `len / 2` items.
pub fn split(range: Range<usize>) -> (Range<usize>, Range<usize>) {
  let mid = range.start + range.len() / 2;
  (range.start..mid, mid..range.end)
}

/// Inverse-variance portfolio over `indices`, normalized to sum to one.
pub fn inverse_variance_portfolio(cov: &Array2<f64>, indices: &[usize]) -> Result<Array1<f64>> {
  let mut ivp = Array1::<f64>::zeros(indices.len());
  for (slot, &i) in indices.iter().enumerate() {
    let v = cov[[i, i]];
    if !v.is_finite() || v <= MIN_VARIANCE {
      return Err(AllocationError::unstable(
        i,
        format!("variance {v} cannot be inverted"),
      ));
    }
    ivp[slot] = 1.0 / v;
  }
  let total = ivp.sum();
  Ok(ivp / total)
}

/// Variance of the inverse-variance portfolio restricted to `indices`.
pub fn cluster_variance(cov: &Array2<f64>, indices: &[usize]) -> Result<f64> {
  let w = inverse_variance_portfolio(cov, indices)?;
  let sub = cov.select(Axis(0), indices).select(Axis(1), indices);
  let var = w.dot(&sub.dot(&w));
  if !var.is_finite() || var <= 0.0 {
    return Err(AllocationError::unstable(
      indices[0],
      format!("cluster variance {var} is not positive"),
    ));
  }
  Ok(var)
}

/// Recursive bisection weights for `cov` over the leaf permutation `order`.
///
/// Works through a FIFO queue of `(range, scale)` pairs: every range longer than one
/// is split with [`split`] and its scale shared as `alpha` / `1 - alpha`. The result
/// depends on `order`; permuting it moves assets between halves.
pub fn recursive_bisection(cov: &Array2<f64>, order: &[usize]) -> Result<HierarchicalWeights> {
  let n = order.len();
  let (rows, cols) = cov.dim();
  if n == 0 || rows != cols || rows != n {
    return Err(AllocationError::DataShape(format!(
      "covariance is {rows}x{cols} but the leaf order has {n} entries"
    )));
  }
  let mut seen = vec![false; n];
  for &i in order {
    if i >= n || seen[i] {
      return Err(AllocationError::DataShape(format!(
        "leaf order is not a permutation of 0..{n} (offending entry {i})"
      )));
    }
    seen[i] = true;
  }

  let mut weights = vec![0.0; n];
  let mut queue = VecDeque::from([(0..n, 1.0_f64)]);
  let mut splits = 0usize;

  while let Some((range, scale)) = queue.pop_front() {
    if range.len() == 1 {
      weights[range.start] = scale;
      continue;
    }

    let (left, right) = split(range);
    let var_left = cluster_variance(cov, &order[left.clone()])?;
    let var_right = cluster_variance(cov, &order[right.clone()])?;
    let alpha = 1.0 - var_left / (var_left + var_right);

    queue.push_back((left, scale * alpha));
    queue.push_back((right, scale * (1.0 - alpha)));
    splits += 1;
  }

  debug!(assets = n, splits, "recursive bisection done");
  Ok(HierarchicalWeights {
    leaf_order: order.to_vec(),
    weights,
    basis: 1.0,
  })
}
