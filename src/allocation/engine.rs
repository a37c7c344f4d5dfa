//! # Hierarchical Engine
//!
//! $$
//! R \to \rho \to D \to \tilde D \to Z \to \mathbf w
//! $$
//!
//! Entry point tying return data, clustering and the three allocators together.

use tracing::debug;

use super::bisection;
use super::risk_budget;
use super::risk_budget::RiskBudgetConfig;
use super::tree_halving;
use super::types::Allocation;
use super::types::AllocationMethod;
use super::types::HierarchicalWeights;
use super::types::RiskBudgetAllocation;
use crate::cluster::closeness;
use crate::cluster::linkage;
use crate::cluster::quasi_diagonal_order;
use crate::cluster::similarity_matrix;
use crate::cluster::ClusterTree;
use crate::cluster::Linkage;
use crate::cluster::LinkageMethod;
use crate::data::ReturnMatrix;
use crate::distance::correlation_distance;
use crate::distance::euclidean_embedding;
use crate::distance::CondensedDistance;
use crate::error::AllocationError;
use crate::error::Result;

/// Runtime configuration for [`HierarchicalEngine`].
#[derive(Clone, Debug)]
pub struct HierarchicalEngineConfig {
  /// Linkage rule; `None` uses the allocation method's own default.
  pub linkage: Option<LinkageMethod>,
  /// Flip merge children to minimise adjacent leaf dissimilarity.
  pub optimal_ordering: bool,
  /// Cluster on distances between distance profiles instead of the raw correlation distance.
  pub euclidean_embedding: bool,
  /// Weight placed on the root by tree halving.
  pub root_weight: f64,
  pub risk_budget: RiskBudgetConfig,
}

impl Default for HierarchicalEngineConfig {
  fn default() -> Self {
    Self {
      linkage: None,
      optimal_ordering: true,
      euclidean_embedding: true,
      root_weight: 100.0,
      risk_budget: RiskBudgetConfig::default(),
    }
  }
}

/// Single entry point for hierarchical clustering allocations.
#[derive(Clone, Debug, Default)]
pub struct HierarchicalEngine {
  config: HierarchicalEngineConfig,
}

impl HierarchicalEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: HierarchicalEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &HierarchicalEngineConfig {
    &self.config
  }

  /// Linkage rule used for `method`.
  pub fn linkage_for(&self, method: AllocationMethod) -> LinkageMethod {
    self.config.linkage.unwrap_or(method.default_linkage())
  }

  /// Dissimilarities the clusterer runs on.
  pub fn dissimilarity(&self, returns: &ReturnMatrix) -> Result<CondensedDistance> {
    let dist = correlation_distance(&returns.correlation()?)?;
    if self.config.euclidean_embedding {
      euclidean_embedding(&dist)
    } else {
      CondensedDistance::from_square(&dist)
    }
  }

  /// Merge history of the assets in `returns` under `rule`.
  pub fn cluster(&self, returns: &ReturnMatrix, rule: LinkageMethod) -> Result<Linkage> {
    ensure_clusterable(returns)?;
    let y = self.dissimilarity(returns)?;
    linkage(&y, rule, self.config.optimal_ordering)
  }

  /// Recursive bisection weights (sum to 1) in quasi-diagonal order.
  pub fn recursive_bisection(&self, returns: &ReturnMatrix) -> Result<HierarchicalWeights> {
    let rule = self.linkage_for(AllocationMethod::RecursiveBisection);
    let z = self.cluster(returns, rule)?;
    let order = quasi_diagonal_order(&z)?;
    let cov = returns.covariance()?;
    bisection::recursive_bisection(&cov, &order)
  }

  /// Tree-halving weights (sum to the root weight) in the clustering's leaf order.
  pub fn tree_halving(&self, returns: &ReturnMatrix) -> Result<HierarchicalWeights> {
    let rule = self.linkage_for(AllocationMethod::TreeHalving);
    let z = self.cluster(returns, rule)?;
    let tree = ClusterTree::from_linkage(&z)?;
    tree_halving::tree_halving(&tree, self.config.root_weight)
  }

  /// One risk-budget allocation per configured risk-aversion level, in asset order.
  pub fn risk_budgeting(&self, returns: &ReturnMatrix) -> Result<Vec<RiskBudgetAllocation>> {
    let cfg = &self.config.risk_budget;
    cfg.validate()?;
    let rule = self.linkage_for(AllocationMethod::RiskBudgeting);
    let z = self.cluster(returns, rule)?;
    let s = closeness(&similarity_matrix(&z), cfg.distance_scale)?;
    let std_devs = returns.std_devs()?;
    risk_budget::risk_budgeting(&s, &std_devs.to_vec(), cfg)
  }

  /// Run `method` on `returns`.
  pub fn allocate(&self, method: AllocationMethod, returns: &ReturnMatrix) -> Result<Allocation> {
    debug!(
      %method,
      linkage = %self.linkage_for(method),
      assets = returns.n_assets(),
      observations = returns.n_observations(),
      "allocation started"
    );

    Ok(match method {
      AllocationMethod::RecursiveBisection => {
        Allocation::RecursiveBisection(self.recursive_bisection(returns)?)
      }
      AllocationMethod::TreeHalving => Allocation::TreeHalving(self.tree_halving(returns)?),
      AllocationMethod::RiskBudgeting => Allocation::RiskBudgeting(self.risk_budgeting(returns)?),
    })
  }
}

fn ensure_clusterable(returns: &ReturnMatrix) -> Result<()> {
  let n = returns.n_assets();
  if n < 2 {
    return Err(AllocationError::DegenerateTree { assets: n });
  }
  Ok(())
}
