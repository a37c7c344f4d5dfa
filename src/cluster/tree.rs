//! # Cluster Tree
//!
//! $$
//! \mathcal T=(V,E),\quad |V_{\text{leaf}}|=N,\quad |V_{\text{internal}}|=N-1
//! $$
//!
//! Explicit binary tree of the merge history, stored as an index-addressed arena.

use super::linkage::Linkage;
use crate::error::AllocationError;
use crate::error::Result;

/// Arena slot of a [`ClusterTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterNode {
  /// Asset index for leaves (`< N`), cluster id for merges (`>= N`).
  pub id: usize,
  /// Arena slot of the parent; `None` for the root.
  pub parent: Option<usize>,
  /// Arena slots of the left and right child; `None` for leaves.
  pub children: Option<(usize, usize)>,
}

impl ClusterNode {
  pub fn is_leaf(&self) -> bool {
    self.children.is_none()
  }
}

/// Binary cluster tree rooted at the final merge. The root lives in slot 0.
#[derive(Clone, Debug)]
pub struct ClusterTree {
  nodes: Vec<ClusterNode>,
  n_leaves: usize,
}

impl ClusterTree {
  /// Expand the merge history top-down from cluster `2N - 2`.
  pub fn from_linkage(linkage: &Linkage) -> Result<Self> {
    let n = linkage.n_leaves();
    let mut nodes = Vec::with_capacity(2 * n - 1);
    nodes.push(ClusterNode {
      id: linkage.root(),
      parent: None,
      children: None,
    });

    let mut seen = vec![false; n];
    let mut stack = vec![0usize];
    while let Some(slot) = stack.pop() {
      let id = nodes[slot].id;
      match linkage.children(id) {
        Some((l, r)) => {
          let left = nodes.len();
          nodes.push(ClusterNode {
            id: l,
            parent: Some(slot),
            children: None,
          });
          let right = nodes.len();
          nodes.push(ClusterNode {
            id: r,
            parent: Some(slot),
            children: None,
          });
          nodes[slot].children = Some((left, right));
          stack.push(right);
          stack.push(left);
        }
        None => {
          if id >= n || seen[id] {
            return Err(AllocationError::DataShape(format!(
              "leaf {id} is out of range or reached twice"
            )));
          }
          seen[id] = true;
        }
      }
    }

    if let Some(missing) = seen.iter().position(|s| !s) {
      return Err(AllocationError::DataShape(format!(
        "asset {missing} is missing from the cluster tree"
      )));
    }

    Ok(Self { nodes, n_leaves: n })
  }

  pub fn nodes(&self) -> &[ClusterNode] {
    &self.nodes
  }

  pub fn root(&self) -> &ClusterNode {
    &self.nodes[0]
  }

  pub fn n_leaves(&self) -> usize {
    self.n_leaves
  }

  pub fn n_internal(&self) -> usize {
    self.nodes.len() - self.n_leaves
  }

  /// Arena slots in depth-first, left-before-right order.
  pub fn preorder(&self) -> Vec<usize> {
    let mut out = Vec::with_capacity(self.nodes.len());
    let mut stack = vec![0usize];
    while let Some(slot) = stack.pop() {
      out.push(slot);
      if let Some((l, r)) = self.nodes[slot].children {
        stack.push(r);
        stack.push(l);
      }
    }
    out
  }

  /// Asset indices of the leaves in traversal order.
  pub fn leaves(&self) -> Vec<usize> {
    self
      .preorder()
      .into_iter()
      .filter(|&slot| self.nodes[slot].is_leaf())
      .map(|slot| self.nodes[slot].id)
      .collect()
  }

  /// Number of edges between `slot` and the root.
  pub fn depth(&self, slot: usize) -> usize {
    let mut depth = 0;
    let mut cur = self.nodes[slot].parent;
    while let Some(p) = cur {
      depth += 1;
      cur = self.nodes[p].parent;
    }
    depth
  }
}
