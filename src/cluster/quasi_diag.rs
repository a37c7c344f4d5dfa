//! # Quasi-Diagonalization
//!
//! $$
//! \Sigma \mapsto P^\top \Sigma P,\qquad P = \text{permutation from the linkage leaves}
//! $$
//!
//! Expands the final merge into its leaves so that similar assets sit next to each
//! other and the covariance matrix becomes approximately block-diagonal.

use ndarray::Array2;
use tracing::debug;

use super::linkage::Linkage;
use crate::error::AllocationError;
use crate::error::Result;

/// Leaf sequence obtained by repeatedly replacing every cluster id with its two children.
///
/// Starts from the children of the last merge and sweeps left to right until only
/// original asset indices remain.
pub fn quasi_diagonal_order(linkage: &Linkage) -> Result<Vec<usize>> {
  let n = linkage.n_leaves();
  let root = linkage.root();
  let (left, right) = linkage
    .children(root)
    .ok_or(AllocationError::DegenerateTree { assets: n })?;

  let mut order = vec![left, right];
  let mut sweeps = 0;
  while order.iter().any(|&id| id >= n) {
    let mut expanded = Vec::with_capacity(order.len() * 2);
    for &id in &order {
      match linkage.children(id) {
        Some((l, r)) => {
          expanded.push(l);
          expanded.push(r);
        }
        None => expanded.push(id),
      }
    }
    order = expanded;
    sweeps += 1;
  }

  let mut seen = vec![false; n];
  for &leaf in &order {
    if seen[leaf] {
      return Err(AllocationError::DataShape(format!(
        "leaf {leaf} appears twice in the quasi-diagonal order"
      )));
    }
    seen[leaf] = true;
  }
  if order.len() != n {
    return Err(AllocationError::DataShape(format!(
      "quasi-diagonal order holds {} of {n} leaves",
      order.len()
    )));
  }

  debug!(assets = n, sweeps, "quasi-diagonal order built");
  Ok(order)
}

/// Rows and columns of a square matrix permuted into `order`.
pub fn reorder_matrix(matrix: &Array2<f64>, order: &[usize]) -> Result<Array2<f64>> {
  let (rows, cols) = matrix.dim();
  if rows != cols || order.len() != rows || order.iter().any(|&i| i >= rows) {
    return Err(AllocationError::DataShape(format!(
      "cannot reorder a {rows}x{cols} matrix with {} indices",
      order.len()
    )));
  }
  Ok(Array2::from_shape_fn((rows, cols), |(i, j)| {
    matrix[[order[i], order[j]]]
  }))
}

#[cfg(test)]
mod tests {
  use ndarray::array;
  use ndarray_rand::rand::rngs::StdRng;
  use ndarray_rand::rand::SeedableRng;
  use ndarray_rand::rand_distr::Uniform;
  use ndarray_rand::RandomExt;

  use super::*;
  use crate::cluster::linkage::linkage;
  use crate::cluster::linkage::LinkageMethod;
  use crate::cluster::linkage::LinkageRecord;
  use crate::distance::CondensedDistance;

  #[test]
  fn order_is_a_permutation_and_matches_dendrogram_leaves() {
    let mut rng = StdRng::seed_from_u64(11);
    for n in 2..20 {
      let v = ndarray::Array1::random_using(n * (n - 1) / 2, Uniform::new(0.0, 1.0), &mut rng);
      let y = CondensedDistance::new(n, v.to_vec()).unwrap();
      let z = linkage(&y, LinkageMethod::Ward, true).unwrap();
      let order = quasi_diagonal_order(&z).unwrap();

      let mut sorted = order.clone();
      sorted.sort_unstable();
      assert_eq!(sorted, (0..n).collect::<Vec<_>>());
      assert_eq!(order, z.leaf_order());
    }
  }

  #[test]
  fn expands_known_tree() {
    let records = vec![
      LinkageRecord { left: 1, right: 3, height: 0.1, size: 2 },
      LinkageRecord { left: 0, right: 2, height: 0.2, size: 2 },
      LinkageRecord { left: 5, right: 4, height: 0.5, size: 4 },
    ];
    let z = Linkage::from_records(4, records).unwrap();
    assert_eq!(quasi_diagonal_order(&z).unwrap(), vec![0, 2, 1, 3]);
  }

  #[test]
  fn reorders_rows_and_columns() {
    let m = array![[1.0, 0.1, 0.2], [0.1, 2.0, 0.3], [0.2, 0.3, 3.0]];
    let r = reorder_matrix(&m, &[2, 0, 1]).unwrap();
    assert_eq!(r, array![[3.0, 0.2, 0.3], [0.2, 1.0, 0.1], [0.3, 0.1, 2.0]]);
    assert!(reorder_matrix(&m, &[0, 1]).is_err());
  }
}
