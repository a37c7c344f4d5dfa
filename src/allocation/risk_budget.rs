//! # Hierarchical Risk Budgeting
//!
//! $$
//! \mathbf b^\star=\arg\max_{\mathbf b}\ \gamma\,\mathbf b^\top\bar S\,\mathbf b
//! \quad\text{s.t.}\quad \textstyle\sum_i b_i=100,\ 0\le b_i\le 100,\qquad
//! w_i=\frac{b_i/\sigma_i}{\sum_j b_j/\sigma_j}
//! $$
//!
//! Budgets concentrate on assets that sit close together in the cluster tree; the
//! budgets are then turned into weights by inverse volatility.

use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use impl_new_derive::ImplNew;
use ndarray::Array2;
use ndarray::ArrayView1;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::solver::ProjectedGradient;
use super::types::RiskBudgetAllocation;
use crate::data::MIN_VARIANCE;
use crate::distance::MANTEGNA_SCALE;
use crate::error::AllocationError;
use crate::error::Result;

/// Settings of the risk-budget optimisation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskBudgetConfig {
  /// Risk-aversion levels; one allocation is produced per entry, in this order.
  pub gammas: Vec<f64>,
  /// Budget total, also the per-asset upper bound.
  pub total_budget: f64,
  /// Scale `k` of the closeness transform.
  pub distance_scale: f64,
  pub max_iters: u64,
  /// Stationarity tolerance relative to `total_budget`.
  pub tolerance: f64,
}

impl Default for RiskBudgetConfig {
  fn default() -> Self {
    Self {
      gammas: vec![10.0],
      total_budget: 100.0,
      distance_scale: MANTEGNA_SCALE,
      max_iters: 10_000,
      tolerance: 1e-10,
    }
  }
}

impl RiskBudgetConfig {
  pub fn validate(&self) -> Result<()> {
    if self.gammas.is_empty() {
      return Err(AllocationError::InvalidParameter(
        "at least one risk-aversion level is required".into(),
      ));
    }
    if let Some(g) = self.gammas.iter().find(|g| !(g.is_finite() && **g > 0.0)) {
      return Err(AllocationError::InvalidParameter(format!(
        "risk aversion must be finite and positive, got {g}"
      )));
    }
    if !(self.total_budget.is_finite() && self.total_budget > 0.0) {
      return Err(AllocationError::InvalidParameter(format!(
        "total budget must be finite and positive, got {}",
        self.total_budget
      )));
    }
    if !(self.tolerance.is_finite() && self.tolerance > 0.0) || self.max_iters == 0 {
      return Err(AllocationError::InvalidParameter(format!(
        "solver needs a positive tolerance and iteration budget, got {} / {}",
        self.tolerance, self.max_iters
      )));
    }
    Ok(())
  }
}

/// Negated objective `-gamma * b' S b`, minimised over the budget set.
#[derive(Clone, Debug, ImplNew)]
pub struct RiskBudgetObjective {
  pub closeness: Array2<f64>,
  pub gamma: f64,
}

impl CostFunction for RiskBudgetObjective {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, b: &Self::Param) -> std::result::Result<Self::Output, Error> {
    let b = ArrayView1::from(b.as_slice());
    Ok(-self.gamma * b.dot(&self.closeness.dot(&b)))
  }
}

impl Gradient for RiskBudgetObjective {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, b: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
    let b = ArrayView1::from(b.as_slice());
    let g = (self.closeness.dot(&b) + self.closeness.t().dot(&b)) * -self.gamma;
    Ok(g.to_vec())
  }
}

/// Lipschitz constant of the gradient, `2 |gamma| max_i sum_j |S_ij|`.
fn lipschitz(closeness: &Array2<f64>, gamma: f64) -> f64 {
  let row_max = closeness
    .rows()
    .into_iter()
    .map(|r| r.iter().map(|x| x.abs()).sum::<f64>())
    .fold(0.0, f64::max);
  2.0 * gamma.abs() * row_max
}

/// Optimal budgets for one `gamma`, starting from the equal budget.
///
/// Returns the budgets and the number of solver iterations.
pub fn solve_budgets(
  closeness: &Array2<f64>,
  gamma: f64,
  config: &RiskBudgetConfig,
) -> Result<(Vec<f64>, u64)> {
  let (rows, cols) = closeness.dim();
  if rows != cols || rows == 0 {
    return Err(AllocationError::DataShape(format!(
      "closeness matrix must be square and non-empty, got {rows}x{cols}"
    )));
  }
  if closeness.iter().any(|x| !x.is_finite()) {
    return Err(AllocationError::unstable(0, "closeness matrix is not finite"));
  }
  if !(gamma.is_finite() && gamma > 0.0) {
    return Err(AllocationError::InvalidParameter(format!(
      "risk aversion must be finite and positive, got {gamma}"
    )));
  }

  let n = rows;
  let total = config.total_budget;
  let l = lipschitz(closeness, gamma);
  let step = if l > 0.0 { 1.0 / l } else { 1.0 };
  let solver = ProjectedGradient::new(total, total, config.tolerance).with_step(step);
  let start = vec![total / n as f64; n];

  let res = Executor::new(RiskBudgetObjective::new(closeness.clone(), gamma), solver)
    .configure(|state| state.param(start).max_iters(config.max_iters))
    .run()
    .map_err(|e| AllocationError::OptimizationFailure {
      gamma,
      iterations: 0,
      reason: e.to_string(),
    })?;

  let state = res.state();
  let iterations = state.get_iter();
  match state.get_termination_status() {
    TerminationStatus::Terminated(TerminationReason::SolverConverged) => {}
    other => {
      return Err(AllocationError::OptimizationFailure {
        gamma,
        iterations,
        reason: format!("{other:?}"),
      })
    }
  }

  let budgets = state
    .get_param()
    .cloned()
    .ok_or_else(|| AllocationError::OptimizationFailure {
      gamma,
      iterations,
      reason: "solver returned no parameter vector".into(),
    })?;
  debug!(gamma, iterations, cost = state.get_cost(), "risk budgets solved");
  Ok((budgets, iterations))
}

/// Budgets divided by volatility and normalised to sum to one.
pub fn inverse_volatility_weights(budgets: &[f64], std_devs: &[f64]) -> Result<Vec<f64>> {
  if budgets.len() != std_devs.len() {
    return Err(AllocationError::DataShape(format!(
      "{} budgets but {} volatilities",
      budgets.len(),
      std_devs.len()
    )));
  }

  let mut raw = Vec::with_capacity(budgets.len());
  for (i, (&b, &s)) in budgets.iter().zip(std_devs.iter()).enumerate() {
    if !s.is_finite() || s * s <= MIN_VARIANCE {
      return Err(AllocationError::unstable(
        i,
        format!("volatility {s} cannot be inverted"),
      ));
    }
    raw.push(b / s);
  }

  let total: f64 = raw.iter().sum();
  if !(total.is_finite() && total > 0.0) {
    return Err(AllocationError::unstable(
      0,
      format!("scaled budgets sum to {total}"),
    ));
  }
  Ok(raw.into_iter().map(|w| w / total).collect())
}

/// One [`RiskBudgetAllocation`] per configured risk-aversion level, in asset order.
pub fn risk_budgeting(
  closeness: &Array2<f64>,
  std_devs: &[f64],
  config: &RiskBudgetConfig,
) -> Result<Vec<RiskBudgetAllocation>> {
  config.validate()?;
  if closeness.nrows() != std_devs.len() {
    return Err(AllocationError::DataShape(format!(
      "closeness matrix has {} rows but {} volatilities were given",
      closeness.nrows(),
      std_devs.len()
    )));
  }

  let mut out = Vec::with_capacity(config.gammas.len());
  for &gamma in &config.gammas {
    let (budgets, iterations) = solve_budgets(closeness, gamma, config)?;
    let weights = inverse_volatility_weights(&budgets, std_devs)?;
    out.push(RiskBudgetAllocation {
      gamma,
      budgets,
      weights,
      iterations,
    });
  }

  debug!(
    assets = std_devs.len(),
    levels = out.len(),
    "risk budgeting done"
  );
  Ok(out)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray_rand::rand::rngs::StdRng;
  use ndarray_rand::rand::SeedableRng;
  use ndarray_rand::rand_distr::Uniform;
  use ndarray_rand::RandomExt;

  use super::*;
  use crate::cluster::closeness;
  use crate::cluster::linkage;
  use crate::cluster::similarity_matrix;
  use crate::cluster::LinkageMethod;
  use crate::distance::CondensedDistance;

  fn paired() -> Array2<f64> {
    array![[0.5, 0.1, 0.1], [0.1, 0.5, 0.4], [0.1, 0.4, 0.5]]
  }

  #[test]
  fn budgets_stay_feasible_on_random_trees() {
    let mut rng = StdRng::seed_from_u64(3);
    let cfg = RiskBudgetConfig {
      gammas: vec![0.5, 10.0, 250.0],
      ..Default::default()
    };

    for n in [2, 5, 9, 14] {
      let v = ndarray::Array1::random_using(n * (n - 1) / 2, Uniform::new(0.05, 0.7), &mut rng);
      let y = CondensedDistance::new(n, v.to_vec()).unwrap();
      let z = linkage(&y, LinkageMethod::Single, true).unwrap();
      let s = closeness(&similarity_matrix(&z), 0.5).unwrap();
      let std_devs: Vec<f64> = (0..n).map(|i| 0.01 + 0.002 * i as f64).collect();

      let out = risk_budgeting(&s, &std_devs, &cfg).unwrap();
      assert_eq!(out.len(), 3);
      for (alloc, &gamma) in out.iter().zip(cfg.gammas.iter()) {
        assert_eq!(alloc.gamma, gamma);
        assert_abs_diff_eq!(alloc.budgets.iter().sum::<f64>(), 100.0, epsilon = 1e-9);
        assert!(alloc
          .budgets
          .iter()
          .all(|&b| (-1e-12..=100.0 + 1e-12).contains(&b)));
        assert_abs_diff_eq!(alloc.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
      }
    }
  }

  #[test]
  fn budget_moves_towards_the_tight_pair() {
    let (budgets, iterations) = solve_budgets(&paired(), 10.0, &RiskBudgetConfig::default()).unwrap();
    assert_abs_diff_eq!(budgets[0], 0.0, epsilon = 1e-8);
    assert_abs_diff_eq!(budgets[1], 50.0, epsilon = 1e-8);
    assert_abs_diff_eq!(budgets[2], 50.0, epsilon = 1e-8);
    assert!(iterations > 1);
  }

  #[test]
  fn symmetric_closeness_keeps_equal_budgets() {
    let s = Array2::from_shape_fn((4, 4), |(i, j)| if i == j { 0.25 } else { 0.1 });
    let (budgets, _) = solve_budgets(&s, 10.0, &RiskBudgetConfig::default()).unwrap();
    for b in budgets {
      assert_abs_diff_eq!(b, 25.0, epsilon = 1e-9);
    }
  }

  #[test]
  fn weights_scale_with_inverse_volatility() {
    let w = inverse_volatility_weights(&[50.0, 50.0], &[0.1, 0.2]).unwrap();
    assert_abs_diff_eq!(w[0], 2.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 1.0 / 3.0, epsilon = 1e-12);

    let err = inverse_volatility_weights(&[50.0, 50.0], &[0.1, 0.0]).unwrap_err();
    assert!(matches!(
      err,
      AllocationError::NumericalInstability { index: 1, .. }
    ));
  }

  #[test]
  fn rejects_bad_risk_aversion() {
    let std_devs = [0.1, 0.1, 0.1];
    for gammas in [vec![], vec![0.0], vec![-1.0], vec![f64::NAN]] {
      let cfg = RiskBudgetConfig {
        gammas,
        ..Default::default()
      };
      assert!(matches!(
        risk_budgeting(&paired(), &std_devs, &cfg),
        Err(AllocationError::InvalidParameter(_))
      ));
    }
  }

  #[test]
  fn exhausted_iteration_budget_is_a_failure() {
    let cfg = RiskBudgetConfig {
      max_iters: 1,
      ..Default::default()
    };
    let err = solve_budgets(&paired(), 10.0, &cfg).unwrap_err();
    assert!(matches!(
      err,
      AllocationError::OptimizationFailure { gamma, iterations: 1, .. } if gamma == 10.0
    ));
  }
}
