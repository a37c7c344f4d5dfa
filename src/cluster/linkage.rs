//! # Agglomerative Linkage
//!
//! $$
//! d(k, a\cup b)=\alpha_a d(k,a)+\alpha_b d(k,b)+\beta d(a,b)+\gamma\,|d(k,a)-d(k,b)|
//! $$
//!
//! Lance-Williams agglomerative clustering over a condensed dissimilarity vector.

use std::fmt::Display;
use std::str::FromStr;

use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use super::ordering::optimal_leaf_ordering;
use crate::distance::CondensedDistance;
use crate::error::AllocationError;
use crate::error::Result;

/// Merge costs within this relative distance of the minimum count as ties.
const TIE_TOLERANCE: f64 = 1e-12;

/// Rule used to update the dissimilarity between a freshly merged cluster and the rest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkageMethod {
  /// Nearest neighbour.
  Single,
  /// Farthest neighbour.
  Complete,
  /// UPGMA.
  Average,
  /// WPGMA.
  Weighted,
  /// Minimum variance increase.
  #[default]
  Ward,
  /// UPGMC.
  Centroid,
  /// WPGMC.
  Median,
}

impl FromStr for LinkageMethod {
  type Err = AllocationError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "single" => Ok(Self::Single),
      "complete" => Ok(Self::Complete),
      "average" | "upgma" => Ok(Self::Average),
      "weighted" | "wpgma" => Ok(Self::Weighted),
      "ward" => Ok(Self::Ward),
      "centroid" | "upgmc" => Ok(Self::Centroid),
      "median" | "wpgmc" => Ok(Self::Median),
      other => Err(AllocationError::InvalidParameter(format!(
        "unknown linkage rule '{other}'"
      ))),
    }
  }
}

impl Display for LinkageMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LinkageMethod::Single => write!(f, "single"),
      LinkageMethod::Complete => write!(f, "complete"),
      LinkageMethod::Average => write!(f, "average"),
      LinkageMethod::Weighted => write!(f, "weighted"),
      LinkageMethod::Ward => write!(f, "ward"),
      LinkageMethod::Centroid => write!(f, "centroid"),
      LinkageMethod::Median => write!(f, "median"),
    }
  }
}

impl LinkageMethod {
  /// Dissimilarity between cluster `k` and the union of `a` and `b`.
  fn update(self, d_ka: f64, d_kb: f64, d_ab: f64, n_a: f64, n_b: f64, n_k: f64) -> f64 {
    match self {
      LinkageMethod::Single => d_ka.min(d_kb),
      LinkageMethod::Complete => d_ka.max(d_kb),
      LinkageMethod::Average => (n_a * d_ka + n_b * d_kb) / (n_a + n_b),
      LinkageMethod::Weighted => 0.5 * (d_ka + d_kb),
      LinkageMethod::Ward => {
        let t = n_a + n_b + n_k;
        (((n_k + n_a) * d_ka * d_ka + (n_k + n_b) * d_kb * d_kb - n_k * d_ab * d_ab) / t)
          .max(0.0)
          .sqrt()
      }
      LinkageMethod::Centroid => {
        let n = n_a + n_b;
        ((n_a * d_ka * d_ka + n_b * d_kb * d_kb) / n - n_a * n_b * d_ab * d_ab / (n * n))
          .max(0.0)
          .sqrt()
      }
      LinkageMethod::Median => (0.5 * d_ka * d_ka + 0.5 * d_kb * d_kb - 0.25 * d_ab * d_ab)
        .max(0.0)
        .sqrt(),
    }
  }
}

/// One agglomeration step: `left` and `right` merged at `height` into a cluster of `size` leaves.
///
/// Ids below the leaf count are original assets; id `N + i` is the cluster created at step `i`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkageRecord {
  pub left: usize,
  pub right: usize,
  pub height: f64,
  pub size: usize,
}

/// Validated merge history over `N` leaves.
#[derive(Clone, Debug, PartialEq)]
pub struct Linkage {
  n_leaves: usize,
  records: Vec<LinkageRecord>,
  leaf_order: Vec<usize>,
}

impl Linkage {
  /// Validate a merge history: `N - 1` records, no forward references, every
  /// cluster consumed at most once, consistent sizes and finite heights.
  pub fn from_records(n_leaves: usize, records: Vec<LinkageRecord>) -> Result<Self> {
    if n_leaves < 2 {
      return Err(AllocationError::DegenerateTree { assets: n_leaves });
    }
    if records.len() != n_leaves - 1 {
      return Err(AllocationError::DataShape(format!(
        "{} leaves need {} linkage records, got {}",
        n_leaves,
        n_leaves - 1,
        records.len()
      )));
    }

    let mut sizes = vec![1usize; 2 * n_leaves - 1];
    let mut consumed = vec![false; 2 * n_leaves - 1];
    for (step, rec) in records.iter().enumerate() {
      let created = n_leaves + step;
      for child in [rec.left, rec.right] {
        if child >= created {
          return Err(AllocationError::DataShape(format!(
            "record {step} references cluster {child} before it exists"
          )));
        }
        if consumed[child] {
          return Err(AllocationError::DataShape(format!(
            "record {step} merges cluster {child} a second time"
          )));
        }
        consumed[child] = true;
      }
      if rec.left == rec.right {
        return Err(AllocationError::DataShape(format!(
          "record {step} merges cluster {} with itself",
          rec.left
        )));
      }
      if !rec.height.is_finite() {
        return Err(AllocationError::unstable(
          rec.left.min(rec.right),
          format!("record {step} has non-finite height"),
        ));
      }
      sizes[created] = sizes[rec.left] + sizes[rec.right];
      if rec.size != sizes[created] {
        return Err(AllocationError::DataShape(format!(
          "record {step} reports size {} but its children hold {}",
          rec.size, sizes[created]
        )));
      }
    }

    let leaf_order = in_order_leaves(n_leaves, &records);
    Ok(Self {
      n_leaves,
      records,
      leaf_order,
    })
  }

  pub fn n_leaves(&self) -> usize {
    self.n_leaves
  }

  pub fn records(&self) -> &[LinkageRecord] {
    &self.records
  }

  /// Id of the final merge, `2N - 2`.
  pub fn root(&self) -> usize {
    2 * self.n_leaves - 2
  }

  /// Children of cluster `id`, or `None` for an original leaf.
  pub fn children(&self, id: usize) -> Option<(usize, usize)> {
    id.checked_sub(self.n_leaves)
      .and_then(|step| self.records.get(step))
      .map(|r| (r.left, r.right))
  }

  /// Original leaves listed left to right, i.e. the order a dendrogram draws them in.
  pub fn leaf_order(&self) -> &[usize] {
    &self.leaf_order
  }

  /// `(N - 1) x 4` matrix `[left, right, height, size]`.
  pub fn to_matrix(&self) -> Array2<f64> {
    let mut z = Array2::<f64>::zeros((self.records.len(), 4));
    for (i, r) in self.records.iter().enumerate() {
      z[[i, 0]] = r.left as f64;
      z[[i, 1]] = r.right as f64;
      z[[i, 2]] = r.height;
      z[[i, 3]] = r.size as f64;
    }
    z
  }

  /// Cut the tree into at most `max_clusters` flat clusters.
  ///
  /// The last `max_clusters - 1` merges are undone; labels run from 1 in leaf order.
  pub fn flat_clusters(&self, max_clusters: usize) -> Result<Vec<usize>> {
    if max_clusters == 0 {
      return Err(AllocationError::InvalidParameter(
        "max_clusters must be at least 1".to_string(),
      ));
    }
    let n = self.n_leaves;
    let kept = n.saturating_sub(max_clusters.min(n));

    let mut owner: Vec<usize> = (0..2 * n - 1).collect();
    for (step, r) in self.records.iter().enumerate().take(kept) {
      owner[r.left] = n + step;
      owner[r.right] = n + step;
    }

    let top = |mut id: usize| {
      while owner[id] != id {
        id = owner[id];
      }
      id
    };

    let mut labels = vec![0usize; n];
    let mut label_of_root: Vec<Option<usize>> = vec![None; 2 * n - 1];
    let mut next = 1;
    for &leaf in &self.leaf_order {
      let root = top(leaf);
      let label = *label_of_root[root].get_or_insert_with(|| {
        next += 1;
        next - 1
      });
      labels[leaf] = label;
    }
    Ok(labels)
  }
}

fn in_order_leaves(n_leaves: usize, records: &[LinkageRecord]) -> Vec<usize> {
  let mut order = Vec::with_capacity(n_leaves);
  let mut stack = vec![2 * n_leaves - 2];
  while let Some(id) = stack.pop() {
    if id < n_leaves {
      order.push(id);
    } else {
      let r = &records[id - n_leaves];
      stack.push(r.right);
      stack.push(r.left);
    }
  }
  order
}

/// Agglomerative clustering of the `N` items behind a condensed dissimilarity vector.
///
/// Ties in merge cost go to the pair with the lowest combined smallest-leaf index.
/// With `optimal_ordering` the children of each merge are flipped so that the sum
/// of dissimilarities between adjacent leaves is minimal.
pub fn linkage(
  dissimilarity: &CondensedDistance,
  method: LinkageMethod,
  optimal_ordering: bool,
) -> Result<Linkage> {
  let n = dissimilarity.n();
  if n < 2 {
    return Err(AllocationError::DegenerateTree { assets: n });
  }

  let mut d = dissimilarity.to_square();
  let mut active = vec![true; n];
  let mut cluster_id: Vec<usize> = (0..n).collect();
  let mut size = vec![1usize; n];
  let mut min_leaf: Vec<usize> = (0..n).collect();
  let mut records = Vec::with_capacity(n - 1);

  for step in 0..(n - 1) {
    let mut best: Option<(usize, usize)> = None;
    let mut best_d = f64::INFINITY;

    for a in 0..n {
      if !active[a] {
        continue;
      }
      for b in (a + 1)..n {
        if !active[b] {
          continue;
        }
        let dab = d[[a, b]];
        let take = match best {
          None => true,
          Some((ba, bb)) => {
            let tol = TIE_TOLERANCE * best_d.abs().max(1.0);
            if dab < best_d - tol {
              true
            } else if dab <= best_d + tol {
              tie_key(&min_leaf, a, b) < tie_key(&min_leaf, ba, bb)
            } else {
              false
            }
          }
        };
        if take {
          best = Some((a, b));
          best_d = best_d.min(dab);
        }
      }
    }

    let (a, b) = best.ok_or_else(|| {
      AllocationError::DataShape(format!("no active pair left at merge step {step}"))
    })?;
    let height = d[[a, b]];
    let (left, right) = if cluster_id[a] < cluster_id[b] {
      (cluster_id[a], cluster_id[b])
    } else {
      (cluster_id[b], cluster_id[a])
    };
    trace!(step, left, right, height, "merge");
    records.push(LinkageRecord {
      left,
      right,
      height,
      size: size[a] + size[b],
    });

    let (n_a, n_b) = (size[a] as f64, size[b] as f64);
    for k in 0..n {
      if !active[k] || k == a || k == b {
        continue;
      }
      let updated = method.update(d[[k, a]], d[[k, b]], height, n_a, n_b, size[k] as f64);
      d[[a, k]] = updated;
      d[[k, a]] = updated;
    }

    active[b] = false;
    cluster_id[a] = n + step;
    size[a] += size[b];
    min_leaf[a] = min_leaf[a].min(min_leaf[b]);
  }

  if optimal_ordering {
    optimal_leaf_ordering(n, &mut records, dissimilarity)?;
  }

  let linkage = Linkage::from_records(n, records)?;
  debug!(
    assets = n,
    rule = %method,
    optimal_ordering,
    root_height = linkage.records.last().map(|r| r.height).unwrap_or(0.0),
    "linkage built"
  );
  Ok(linkage)
}

fn tie_key(min_leaf: &[usize], a: usize, b: usize) -> (usize, usize) {
  let (x, y) = (min_leaf[a], min_leaf[b]);
  (x + y, x.min(y))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray_rand::rand::rngs::StdRng;
  use ndarray_rand::rand::SeedableRng;
  use ndarray_rand::rand_distr::Uniform;
  use ndarray_rand::RandomExt;

  use super::*;

  fn condensed(values: &[f64], n: usize) -> CondensedDistance {
    CondensedDistance::new(n, values.to_vec()).unwrap()
  }

  fn random_condensed(n: usize, seed: u64) -> CondensedDistance {
    let mut rng = StdRng::seed_from_u64(seed);
    let v = ndarray::Array1::random_using(n * (n - 1) / 2, Uniform::new(0.1, 2.0), &mut rng);
    CondensedDistance::new(n, v.to_vec()).unwrap()
  }

  const ALL: [LinkageMethod; 7] = [
    LinkageMethod::Single,
    LinkageMethod::Complete,
    LinkageMethod::Average,
    LinkageMethod::Weighted,
    LinkageMethod::Ward,
    LinkageMethod::Centroid,
    LinkageMethod::Median,
  ];

  #[test]
  fn every_rule_yields_n_minus_one_records_without_forward_refs() {
    for n in 2..12 {
      let y = random_condensed(n, n as u64);
      for method in ALL {
        for ordering in [false, true] {
          let z = linkage(&y, method, ordering).unwrap();
          assert_eq!(z.records().len(), n - 1);
          for (step, r) in z.records().iter().enumerate() {
            assert!(r.left < n + step && r.right < n + step);
          }
          assert_eq!(z.records().last().unwrap().size, n);

          let mut order = z.leaf_order().to_vec();
          order.sort_unstable();
          assert_eq!(order, (0..n).collect::<Vec<_>>());
        }
      }
    }
  }

  #[test]
  fn single_linkage_heights_on_known_input() {
    // 0 -- 1 at 1.0, 2 joins at 2.0, 3 joins at 4.0
    let y = condensed(&[1.0, 2.0, 6.0, 3.0, 5.0, 4.0], 4);
    let z = linkage(&y, LinkageMethod::Single, false).unwrap();
    let heights: Vec<f64> = z.records().iter().map(|r| r.height).collect();
    assert_eq!(heights, vec![1.0, 2.0, 4.0]);
    assert_eq!((z.records()[0].left, z.records()[0].right), (0, 1));
    assert_eq!((z.records()[1].left, z.records()[1].right), (2, 4));
    assert_eq!((z.records()[2].left, z.records()[2].right), (3, 5));
  }

  #[test]
  fn ward_matches_lance_williams_by_hand() {
    // points on a line at 0, 1, 5
    let y = condensed(&[1.0, 5.0, 4.0], 3);
    let z = linkage(&y, LinkageMethod::Ward, false).unwrap();
    assert_abs_diff_eq!(z.records()[0].height, 1.0, epsilon = 1e-12);
    let expected = ((2.0 * 25.0 + 2.0 * 16.0 - 1.0) / 3.0_f64).sqrt();
    assert_abs_diff_eq!(z.records()[1].height, expected, epsilon = 1e-12);
  }

  #[test]
  fn ties_prefer_lowest_combined_leaf_index() {
    let y = condensed(&[1.0; 6], 4);
    let z = linkage(&y, LinkageMethod::Single, false).unwrap();
    assert_eq!((z.records()[0].left, z.records()[0].right), (0, 1));
    assert_eq!((z.records()[1].left, z.records()[1].right), (2, 4));
    assert_eq!((z.records()[2].left, z.records()[2].right), (3, 5));

    let again = linkage(&y, LinkageMethod::Single, false).unwrap();
    assert_eq!(z, again);
  }

  #[test]
  fn tied_pairs_merge_in_leaf_order_not_scan_order() {
    // d(0, 4) = d(1, 2) = 1; the scan meets (0, 4) first but (1, 2) has the smaller leaves
    let y = condensed(&[3.0, 3.0, 3.0, 1.0, 1.0, 3.0, 3.0, 3.0, 3.0, 3.0], 5);
    let z = linkage(&y, LinkageMethod::Single, false).unwrap();
    assert_eq!((z.records()[0].left, z.records()[0].right), (1, 2));
    assert_eq!(z.records()[0].height, 1.0);
    assert_eq!((z.records()[1].left, z.records()[1].right), (0, 4));
    assert_eq!(z.records()[1].height, 1.0);
  }

  #[test]
  fn single_asset_is_degenerate() {
    let y = condensed(&[], 1);
    let err = linkage(&y, LinkageMethod::Ward, true).unwrap_err();
    assert_eq!(err, AllocationError::DegenerateTree { assets: 1 });
  }

  #[test]
  fn malformed_records_are_rejected() {
    let forward = vec![
      LinkageRecord { left: 0, right: 4, height: 1.0, size: 2 },
      LinkageRecord { left: 1, right: 2, height: 2.0, size: 2 },
    ];
    assert!(Linkage::from_records(3, forward).is_err());

    let reused = vec![
      LinkageRecord { left: 0, right: 1, height: 1.0, size: 2 },
      LinkageRecord { left: 0, right: 2, height: 2.0, size: 2 },
    ];
    assert!(Linkage::from_records(3, reused).is_err());

    let short = vec![LinkageRecord { left: 0, right: 1, height: 1.0, size: 2 }];
    assert!(Linkage::from_records(3, short).is_err());
  }

  #[test]
  fn parse_rule_names() {
    assert_eq!("Ward".parse::<LinkageMethod>().unwrap(), LinkageMethod::Ward);
    assert_eq!("upgma".parse::<LinkageMethod>().unwrap(), LinkageMethod::Average);
    assert!(matches!(
      "nearest".parse::<LinkageMethod>(),
      Err(AllocationError::InvalidParameter(_))
    ));
  }

  #[test]
  fn flat_clusters_cut_the_last_merges() {
    let y = condensed(&[1.0, 2.0, 6.0, 3.0, 5.0, 4.0], 4);
    let z = linkage(&y, LinkageMethod::Single, false).unwrap();

    let two = z.flat_clusters(2).unwrap();
    assert_eq!(two[0], two[1]);
    assert_eq!(two[0], two[2]);
    assert_ne!(two[0], two[3]);

    let all = z.flat_clusters(10).unwrap();
    let mut labels = all.clone();
    labels.sort_unstable();
    assert_eq!(labels, vec![1, 2, 3, 4]);

    assert_eq!(z.flat_clusters(1).unwrap(), vec![1; 4]);
  }

  #[test]
  fn matrix_form_mirrors_records() {
    let y = condensed(&[1.0, 2.0, 6.0, 3.0, 5.0, 4.0], 4);
    let z = linkage(&y, LinkageMethod::Single, false).unwrap();
    let m = z.to_matrix();
    assert_eq!(m.dim(), (3, 4));
    assert_eq!(m[[2, 3]], 4.0);
    assert_eq!(z.children(z.root()), Some((3, 5)));
    assert_eq!(z.children(2), None);
  }
}
