//! # Allocation Types
//!
//! $$
//! \mathbf w \in \mathbb R_{\ge 0}^N,\qquad \textstyle\sum_i w_i = B
//! $$
//!
//! Shared enums and result containers for the hierarchical allocators.

use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::cluster::LinkageMethod;
use crate::error::AllocationError;

/// Supported hierarchical allocation schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMethod {
  /// Hierarchical Risk Parity: inverse-variance bisection of the quasi-diagonal order.
  RecursiveBisection,
  /// Hierarchical Clustering Asset Allocation: every merge splits its weight in half.
  TreeHalving,
  /// Hierarchical Risk Budgeting: closeness-weighted budgets scaled by inverse volatility.
  RiskBudgeting,
}

impl AllocationMethod {
  /// Linkage rule each scheme runs with unless told otherwise.
  pub fn default_linkage(self) -> LinkageMethod {
    match self {
      AllocationMethod::RecursiveBisection => LinkageMethod::Ward,
      AllocationMethod::TreeHalving => LinkageMethod::Ward,
      AllocationMethod::RiskBudgeting => LinkageMethod::Single,
    }
  }
}

impl FromStr for AllocationMethod {
  type Err = AllocationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "hrp" | "bisection" | "recursive-bisection" => Ok(Self::RecursiveBisection),
      "hcaa" | "halving" | "tree-halving" => Ok(Self::TreeHalving),
      "hrb" | "risk-budget" | "risk-budgeting" => Ok(Self::RiskBudgeting),
      other => Err(AllocationError::InvalidParameter(format!(
        "unknown allocation method '{other}'"
      ))),
    }
  }
}

impl Display for AllocationMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      AllocationMethod::RecursiveBisection => write!(f, "recursive bisection"),
      AllocationMethod::TreeHalving => write!(f, "tree-weight halving"),
      AllocationMethod::RiskBudgeting => write!(f, "cluster-similarity risk budgeting"),
    }
  }
}

/// Weights laid out in clustering leaf order.
///
/// `weights[p]` belongs to asset `leaf_order[p]`; the weights sum to `basis`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalWeights {
  /// Asset index at each position.
  pub leaf_order: Vec<usize>,
  /// Weight at each position.
  pub weights: Vec<f64>,
  /// Total the weights add up to (1 for bisection, the root weight for halving).
  pub basis: f64,
}

impl HierarchicalWeights {
  /// Weights remapped to the caller's asset order.
  pub fn by_asset(&self) -> Vec<f64> {
    let mut out = vec![0.0; self.weights.len()];
    for (&asset, &w) in self.leaf_order.iter().zip(self.weights.iter()) {
      out[asset] = w;
    }
    out
  }

  /// Weights in leaf order divided by `basis`, i.e. summing to 1.
  pub fn fractions(&self) -> Vec<f64> {
    self.weights.iter().map(|w| w / self.basis).collect()
  }

  pub fn total(&self) -> f64 {
    self.weights.iter().sum()
  }
}

/// Risk-budget solution for one risk-aversion level, in the caller's asset order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskBudgetAllocation {
  /// Risk-aversion coefficient.
  pub gamma: f64,
  /// Optimal budgets, summing to the total budget (100).
  pub budgets: Vec<f64>,
  /// Inverse-volatility scaled budgets, summing to 1.
  pub weights: Vec<f64>,
  /// Solver iterations used.
  pub iterations: u64,
}

/// Output of [`super::HierarchicalEngine::allocate`]; each scheme keeps its own normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "result", rename_all = "snake_case")]
pub enum Allocation {
  RecursiveBisection(HierarchicalWeights),
  TreeHalving(HierarchicalWeights),
  RiskBudgeting(Vec<RiskBudgetAllocation>),
}
