//! # Optimal Leaf Ordering
//!
//! $$
//! M(v,i,j)=\min_{k\in L,\;m\in R}\;M(L,i,k)+d(k,m)+M(R,m,j)
//! $$
//!
//! Bar-Joseph, Gifford & Jaakkola (2001): flip the children of each merge so the
//! sum of dissimilarities between adjacent leaves is minimal. Runs in `O(N^3)`.

use ndarray::Array2;

use super::linkage::LinkageRecord;
use crate::distance::CondensedDistance;
use crate::error::AllocationError;
use crate::error::Result;

/// Sum of dissimilarities between neighbouring leaves of `order`.
pub fn adjacent_cost(order: &[usize], dissimilarity: &CondensedDistance) -> f64 {
  order
    .windows(2)
    .map(|w| dissimilarity.get(w[0], w[1]))
    .sum()
}

/// Leaves of the child of `node` that does not hold `u`; `node` itself when it is a leaf.
fn opposite<'a>(
  node: usize,
  u: usize,
  n: usize,
  kids: &[(usize, usize)],
  leaves: &'a [Vec<usize>],
) -> &'a [usize] {
  if node < n {
    return &leaves[node];
  }
  let (l, r) = kids[node - n];
  if leaves[l].contains(&u) {
    &leaves[r]
  } else {
    &leaves[l]
  }
}

/// Reorder the children of `records` in place; merge pairs and heights are untouched.
pub(crate) fn optimal_leaf_ordering(
  n: usize,
  records: &mut [LinkageRecord],
  dissimilarity: &CondensedDistance,
) -> Result<()> {
  if n < 2 {
    return Err(AllocationError::DegenerateTree { assets: n });
  }
  if records.len() != n - 1 || dissimilarity.n() != n {
    return Err(AllocationError::DataShape(format!(
      "leaf ordering over {n} leaves got {} records and {} dissimilarity items",
      records.len(),
      dissimilarity.n()
    )));
  }

  let mut kids: Vec<(usize, usize)> = Vec::with_capacity(n - 1);
  let mut leaves: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
  for (step, r) in records.iter().enumerate() {
    if r.left >= n + step || r.right >= n + step {
      return Err(AllocationError::DataShape(format!(
        "record {step} references a cluster that does not exist yet"
      )));
    }
    let mut merged = leaves[r.left].clone();
    merged.extend_from_slice(&leaves[r.right]);
    leaves.push(merged);
    kids.push((r.left, r.right));
  }

  // cost[i, j]: best ordering of the subtree rooted at lca(i, j) starting at i, ending at j
  let mut cost = Array2::<f64>::zeros((n, n));
  let mut via = Array2::<f64>::zeros((n, n));

  for &(l, r) in &kids {
    for &u in &leaves[l] {
      let inner = opposite(l, u, n, &kids, &leaves);
      for &m in &leaves[r] {
        let mut best = f64::INFINITY;
        for &k in inner {
          let c = cost[[u, k]] + dissimilarity.get(k, m);
          if c < best {
            best = c;
          }
        }
        via[[u, m]] = best;
      }
    }

    let right_inner: Vec<&[usize]> = leaves[r]
      .iter()
      .map(|&w| opposite(r, w, n, &kids, &leaves))
      .collect();
    for &u in &leaves[l] {
      for (&w, inner) in leaves[r].iter().zip(right_inner.iter()) {
        let mut best = f64::INFINITY;
        for &m in inner.iter() {
          let c = via[[u, m]] + cost[[m, w]];
          if c < best {
            best = c;
          }
        }
        cost[[u, w]] = best;
        cost[[w, u]] = best;
      }
    }
  }

  let root = 2 * n - 2;
  let (root_l, root_r) = kids[n - 2];
  let mut start = (leaves[root_l][0], leaves[root_r][0]);
  let mut best = f64::INFINITY;
  for &u in &leaves[root_l] {
    for &w in &leaves[root_r] {
      if cost[[u, w]] < best {
        best = cost[[u, w]];
        start = (u, w);
      }
    }
  }

  let mut stack = vec![(root, start.0, start.1)];
  while let Some((node, u, w)) = stack.pop() {
    if node < n {
      continue;
    }
    let step = node - n;
    let (mut l, mut r) = kids[step];
    if !leaves[l].contains(&u) {
      std::mem::swap(&mut l, &mut r);
      kids[step] = (l, r);
      records[step].left = l;
      records[step].right = r;
    }

    let left_inner = opposite(l, u, n, &kids, &leaves);
    let right_inner = opposite(r, w, n, &kids, &leaves);
    let mut pick = (left_inner[0], right_inner[0]);
    let mut best = f64::INFINITY;
    for &k in left_inner {
      for &m in right_inner {
        let c = cost[[u, k]] + dissimilarity.get(k, m) + cost[[m, w]];
        if c < best {
          best = c;
          pick = (k, m);
        }
      }
    }

    stack.push((r, pick.1, w));
    stack.push((l, u, pick.0));
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray_rand::rand::rngs::StdRng;
  use ndarray_rand::rand::SeedableRng;
  use ndarray_rand::rand_distr::Uniform;
  use ndarray_rand::RandomExt;

  use super::*;
  use crate::cluster::linkage::linkage;
  use crate::cluster::linkage::Linkage;
  use crate::cluster::linkage::LinkageMethod;

  fn random_condensed(n: usize, seed: u64) -> CondensedDistance {
    let mut rng = StdRng::seed_from_u64(seed);
    let v = ndarray::Array1::random_using(n * (n - 1) / 2, Uniform::new(0.0, 1.0), &mut rng);
    CondensedDistance::new(n, v.to_vec()).unwrap()
  }

  fn brute_force_best(n: usize, records: &[LinkageRecord], y: &CondensedDistance) -> f64 {
    let mut best = f64::INFINITY;
    for mask in 0..(1usize << (n - 1)) {
      let mut flipped = records.to_vec();
      for (i, r) in flipped.iter_mut().enumerate() {
        if mask & (1 << i) != 0 {
          std::mem::swap(&mut r.left, &mut r.right);
        }
      }
      let z = Linkage::from_records(n, flipped).unwrap();
      best = best.min(adjacent_cost(z.leaf_order(), y));
    }
    best
  }

  #[test]
  fn matches_exhaustive_search_on_small_trees() {
    for n in 2..9 {
      for seed in 0..4 {
        let y = random_condensed(n, 100 * n as u64 + seed);
        let plain = linkage(&y, LinkageMethod::Average, false).unwrap();
        let ordered = linkage(&y, LinkageMethod::Average, true).unwrap();

        let best = brute_force_best(n, plain.records(), &y);
        assert_abs_diff_eq!(adjacent_cost(ordered.leaf_order(), &y), best, epsilon = 1e-10);
      }
    }
  }

  #[test]
  fn only_children_are_flipped() {
    let y = random_condensed(10, 3);
    let plain = linkage(&y, LinkageMethod::Ward, false).unwrap();
    let ordered = linkage(&y, LinkageMethod::Ward, true).unwrap();

    for (a, b) in plain.records().iter().zip(ordered.records()) {
      let mut pa = [a.left, a.right];
      let mut pb = [b.left, b.right];
      pa.sort_unstable();
      pb.sort_unstable();
      assert_eq!(pa, pb);
      assert_eq!(a.height, b.height);
      assert_eq!(a.size, b.size);
    }
    assert!(
      adjacent_cost(ordered.leaf_order(), &y) <= adjacent_cost(plain.leaf_order(), &y) + 1e-12
    );
  }
}
