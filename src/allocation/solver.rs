//! # Capped-Simplex Projected Gradient
//!
//! $$
//! \mathbf b_{k+1}=P_{\mathcal C}\big(\mathbf b_k-\alpha_k\nabla f(\mathbf b_k)\big),\qquad
//! \mathcal C=\{\mathbf b:\textstyle\sum_i b_i=B,\ 0\le b_i\le U\}
//! $$
//!
//! An `argmin` solver for smooth objectives over a budget simplex with box caps.
//! Every step is found by Armijo backtracking from a trial length that starts at
//! `1 / L` and doubles after each accepted step, up to `MAX_STEP_RATIO / L`. The
//! solver reports convergence once the projected gradient step at `1 / L` no
//! longer moves the iterate by more than `tolerance * B`.

use anyhow::anyhow;
use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Gradient;
use argmin::core::IterState;
use argmin::core::Problem;
use argmin::core::Solver;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::core::KV;
use serde::Deserialize;
use serde::Serialize;

/// Sufficient-decrease constant of the Armijo rule.
const ARMIJO_C: f64 = 1e-4;

/// Largest trial step as a multiple of the base step.
const MAX_STEP_RATIO: f64 = 1e4;

/// Iteration state used by [`ProjectedGradient`].
pub type ProjectedGradientState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

/// Euclidean projection of `y` onto `{x : sum(x) = total, 0 <= x_i <= upper}`.
///
/// The projection is `clamp(y - tau, 0, upper)` for the unique shift `tau` matching
/// the total, found by bisection. Requires `y.len() * upper >= total`.
pub fn project_capped_simplex(y: &[f64], total: f64, upper: f64) -> Vec<f64> {
  let mass = |tau: f64| -> f64 { y.iter().map(|&v| (v - tau).clamp(0.0, upper)).sum() };

  let mut lo = y.iter().copied().fold(f64::INFINITY, f64::min) - upper;
  let mut hi = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  for _ in 0..256 {
    let mid = 0.5 * (lo + hi);
    if mass(mid) > total {
      lo = mid;
    } else {
      hi = mid;
    }
    if hi - lo <= f64::EPSILON * (1.0 + lo.abs().max(hi.abs())) {
      break;
    }
  }

  let tau = 0.5 * (lo + hi);
  let mut x: Vec<f64> = y.iter().map(|&v| (v - tau).clamp(0.0, upper)).collect();

  // spread the leftover of the bisection over the free coordinates
  let free = x.iter().filter(|&&v| v > 0.0 && v < upper).count();
  if free > 0 {
    let shift = (total - x.iter().sum::<f64>()) / free as f64;
    for v in x.iter_mut().filter(|v| **v > 0.0 && **v < upper) {
      *v = (*v + shift).clamp(0.0, upper);
    }
  }
  x
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
  a.iter()
    .zip(b.iter())
    .map(|(x, y)| (x - y).abs())
    .fold(0.0, f64::max)
}

/// Projected gradient descent on the capped simplex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectedGradient {
  total: f64,
  upper: f64,
  tolerance: f64,
  step: f64,
  trial: f64,
  max_backtracks: usize,
  converged: bool,
}

impl ProjectedGradient {
  /// Solver over `{sum(b) = total, 0 <= b_i <= upper}` with the given stationarity tolerance.
  pub fn new(total: f64, upper: f64, tolerance: f64) -> Self {
    Self {
      total,
      upper,
      tolerance,
      step: 1.0,
      trial: 1.0,
      max_backtracks: 60,
      converged: false,
    }
  }

  /// Base step length, normally `1 / L` for an `L`-smooth objective.
  ///
  /// It scales the stationarity test and is the first trial step of the line search.
  pub fn with_step(mut self, step: f64) -> Self {
    self.step = step;
    self.trial = step;
    self
  }

  fn step_from(&self, param: &[f64], grad: &[f64], alpha: f64) -> Vec<f64> {
    let y: Vec<f64> = param
      .iter()
      .zip(grad.iter())
      .map(|(p, g)| p - alpha * g)
      .collect();
    project_capped_simplex(&y, self.total, self.upper)
  }
}

impl<O> Solver<O, ProjectedGradientState> for ProjectedGradient
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  const NAME: &'static str = "Projected gradient (capped simplex)";

  fn init(
    &mut self,
    problem: &mut Problem<O>,
    mut state: ProjectedGradientState,
  ) -> Result<(ProjectedGradientState, Option<KV>), Error> {
    if !(self.step.is_finite() && self.step > 0.0) {
      return Err(anyhow!("step length must be finite and positive"));
    }
    let start = state
      .take_param()
      .ok_or_else(|| anyhow!("projected gradient needs an initial parameter vector"))?;
    if start.len() as f64 * self.upper < self.total {
      return Err(anyhow!(
        "{} variables capped at {} cannot reach a total of {}",
        start.len(),
        self.upper,
        self.total
      ));
    }

    let param = project_capped_simplex(&start, self.total, self.upper);
    let cost = problem.cost(&param)?;
    let grad = problem.gradient(&param)?;
    self.converged = false;
    self.trial = self.step;
    Ok((state.param(param).cost(cost).gradient(grad), None))
  }

  fn next_iter(
    &mut self,
    problem: &mut Problem<O>,
    mut state: ProjectedGradientState,
  ) -> Result<(ProjectedGradientState, Option<KV>), Error> {
    let param = state
      .take_param()
      .ok_or_else(|| anyhow!("projected gradient lost its parameter vector"))?;
    let grad = state
      .take_gradient()
      .ok_or_else(|| anyhow!("projected gradient lost its gradient"))?;
    let cost = state.get_cost();

    if grad.iter().any(|g| !g.is_finite()) || !cost.is_finite() {
      return Err(anyhow!("objective or gradient is not finite"));
    }

    let probe = self.step_from(&param, &grad, self.step);
    if max_abs_diff(&probe, &param) <= self.tolerance * self.total.abs().max(1.0) {
      self.converged = true;
      return Ok((state.param(param).cost(cost).gradient(grad), None));
    }

    let mut alpha = self.trial;
    for _ in 0..=self.max_backtracks {
      let candidate = self.step_from(&param, &grad, alpha);
      let candidate_cost = problem.cost(&candidate)?;
      let slope: f64 = grad
        .iter()
        .zip(candidate.iter().zip(param.iter()))
        .map(|(g, (c, p))| g * (c - p))
        .sum();

      if candidate_cost.is_finite() && candidate_cost <= cost + ARMIJO_C * slope {
        let candidate_grad = problem.gradient(&candidate)?;
        self.trial = (2.0 * alpha).min(MAX_STEP_RATIO * self.step);
        return Ok((
          state
            .param(candidate)
            .cost(candidate_cost)
            .gradient(candidate_grad),
          None,
        ));
      }
      alpha *= 0.5;
    }

    Err(anyhow!(
      "line search found no sufficient decrease after {} halvings",
      self.max_backtracks
    ))
  }

  fn terminate(&mut self, _state: &ProjectedGradientState) -> TerminationStatus {
    if self.converged {
      TerminationStatus::Terminated(TerminationReason::SolverConverged)
    } else {
      TerminationStatus::NotTerminated
    }
  }
}
