//! # Tree-Weight Halving
//!
//! $$
//! w_{\text{child}} = \tfrac12\,w_{\text{parent}},\qquad w_{\text{root}} = R
//! $$
//!
//! Hierarchical Clustering Asset Allocation with equal splits at every merge.

use tracing::debug;

use super::types::HierarchicalWeights;
use crate::cluster::ClusterTree;
use crate::error::AllocationError;
use crate::error::Result;

/// Per-slot weights of the whole tree, written once each in a single top-down pass.
pub fn node_weights(tree: &ClusterTree, root_weight: f64) -> Result<Vec<f64>> {
  if !(root_weight.is_finite() && root_weight > 0.0) {
    return Err(AllocationError::InvalidParameter(format!(
      "root weight must be finite and positive, got {root_weight}"
    )));
  }

  let nodes = tree.nodes();
  let mut weights = vec![0.0; nodes.len()];
  let mut stack = vec![(0usize, root_weight)];
  while let Some((slot, w)) = stack.pop() {
    weights[slot] = w;
    if let Some((l, r)) = nodes[slot].children {
      stack.push((r, w / 2.0));
      stack.push((l, w / 2.0));
    }
  }
  Ok(weights)
}

/// Leaf weights in traversal (leaf) order on a `root_weight` basis.
///
/// At every merge both children receive half of the parent, independent of their
/// size or risk, so the leaves always add up to `root_weight`.
pub fn tree_halving(tree: &ClusterTree, root_weight: f64) -> Result<HierarchicalWeights> {
  let per_slot = node_weights(tree, root_weight)?;
  let nodes = tree.nodes();

  let mut leaf_order = Vec::with_capacity(tree.n_leaves());
  let mut weights = Vec::with_capacity(tree.n_leaves());
  for slot in tree.preorder() {
    if nodes[slot].is_leaf() {
      leaf_order.push(nodes[slot].id);
      weights.push(per_slot[slot]);
    }
  }

  debug!(assets = leaf_order.len(), root_weight, "tree halving done");
  Ok(HierarchicalWeights {
    leaf_order,
    weights,
    basis: root_weight,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray_rand::rand::rngs::StdRng;
  use ndarray_rand::rand::SeedableRng;
  use ndarray_rand::rand_distr::Uniform;
  use ndarray_rand::RandomExt;

  use super::*;
  use crate::cluster::linkage;
  use crate::cluster::Linkage;
  use crate::cluster::LinkageMethod;
  use crate::cluster::LinkageRecord;
  use crate::distance::CondensedDistance;

  #[test]
  fn leaves_sum_to_root_weight() {
    let mut rng = StdRng::seed_from_u64(9);
    for n in 2..30 {
      let v = ndarray::Array1::random_using(n * (n - 1) / 2, Uniform::new(0.0, 1.0), &mut rng);
      let y = CondensedDistance::new(n, v.to_vec()).unwrap();
      let z = linkage(&y, LinkageMethod::Ward, true).unwrap();
      let tree = ClusterTree::from_linkage(&z).unwrap();

      for root_weight in [1.0, 100.0, 37.5] {
        let w = tree_halving(&tree, root_weight).unwrap();
        assert_abs_diff_eq!(w.total(), root_weight, epsilon = 1e-9 * root_weight);
        assert_eq!(w.leaf_order, z.leaf_order());
      }
    }
  }

  #[test]
  fn caterpillar_weights_halve_with_depth() {
    let records = vec![
      LinkageRecord { left: 0, right: 1, height: 0.1, size: 2 },
      LinkageRecord { left: 4, right: 2, height: 0.2, size: 3 },
      LinkageRecord { left: 5, right: 3, height: 0.3, size: 4 },
    ];
    let tree = ClusterTree::from_linkage(&Linkage::from_records(4, records).unwrap()).unwrap();
    let w = tree_halving(&tree, 100.0).unwrap();

    assert_eq!(w.leaf_order, vec![0, 1, 2, 3]);
    assert_eq!(w.weights, vec![12.5, 12.5, 25.0, 50.0]);
    assert_eq!(w.fractions(), vec![0.125, 0.125, 0.25, 0.5]);
  }

  #[test]
  fn internal_nodes_hold_the_sum_of_their_children() {
    let records = vec![
      LinkageRecord { left: 0, right: 1, height: 0.1, size: 2 },
      LinkageRecord { left: 2, right: 3, height: 0.2, size: 2 },
      LinkageRecord { left: 4, right: 5, height: 0.3, size: 4 },
    ];
    let tree = ClusterTree::from_linkage(&Linkage::from_records(4, records).unwrap()).unwrap();
    let per_slot = node_weights(&tree, 100.0).unwrap();

    for (slot, node) in tree.nodes().iter().enumerate() {
      if let Some((l, r)) = node.children {
        assert_eq!(per_slot[l] + per_slot[r], per_slot[slot]);
      }
    }
    assert!(node_weights(&tree, f64::NAN).is_err());
  }
}
