//! # Return Data
//!
//! $$
//! \Sigma_{ij} = \frac{1}{T-1}\sum_{t=1}^{T}(r_{ti}-\bar r_i)(r_{tj}-\bar r_j),\qquad
//! \rho_{ij} = \frac{\Sigma_{ij}}{\sigma_i\sigma_j}
//! $$
//!
//! Validated return matrix plus covariance, volatility and correlation helpers.

use std::collections::HashSet;

use ndarray::Array1;
use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use tracing::debug;

use crate::error::AllocationError;
use crate::error::Result;

/// Variances at or below this level are treated as a constant return series.
pub const MIN_VARIANCE: f64 = 1e-20;

/// How prices are turned into returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnKind {
  /// `p_t / p_{t-1} - 1`
  #[default]
  Simple,
  /// `ln(p_t / p_{t-1})`
  Log,
}

/// `T x N` matrix of aligned returns with one named column per asset.
#[derive(Clone, Debug)]
pub struct ReturnMatrix {
  returns: Array2<f64>,
  assets: Vec<String>,
}

impl ReturnMatrix {
  /// Validate and wrap a `T x N` return matrix.
  pub fn new(returns: Array2<f64>, assets: Vec<String>) -> Result<Self> {
    let (n_obs, n_assets) = returns.dim();

    if n_assets == 0 {
      return Err(AllocationError::DataShape(
        "return matrix has no asset columns".to_string(),
      ));
    }
    if assets.len() != n_assets {
      return Err(AllocationError::DataShape(format!(
        "{} asset names for {} return columns",
        assets.len(),
        n_assets
      )));
    }
    if n_obs < 2 {
      return Err(AllocationError::DataShape(format!(
        "at least 2 observations are required, got {n_obs}"
      )));
    }

    let mut seen = HashSet::with_capacity(n_assets);
    for name in &assets {
      if !seen.insert(name.as_str()) {
        return Err(AllocationError::DataShape(format!(
          "duplicate asset name '{name}'"
        )));
      }
    }

    if let Some(((t, i), _)) = returns.indexed_iter().find(|(_, v)| !v.is_finite()) {
      return Err(AllocationError::DataShape(format!(
        "non-finite return at observation {t} for asset '{}'",
        assets[i]
      )));
    }

    Ok(Self { returns, assets })
  }

  /// Build returns from an aligned `(T+1) x N` price matrix.
  pub fn from_prices(prices: &Array2<f64>, assets: Vec<String>, kind: ReturnKind) -> Result<Self> {
    let (n_rows, n_cols) = prices.dim();
    if n_rows < 2 {
      return Err(AllocationError::DataShape(format!(
        "at least 2 price rows are required, got {n_rows}"
      )));
    }

    if let Some(((t, i), p)) = prices
      .indexed_iter()
      .find(|(_, p)| !(p.is_finite() && **p > 0.0))
    {
      return Err(AllocationError::DataShape(format!(
        "price {p} at row {t}, column {i} is not strictly positive"
      )));
    }

    let mut returns = Array2::<f64>::zeros((n_rows - 1, n_cols));
    for t in 1..n_rows {
      for i in 0..n_cols {
        let ratio = prices[[t, i]] / prices[[t - 1, i]];
        returns[[t - 1, i]] = match kind {
          ReturnKind::Simple => ratio - 1.0,
          ReturnKind::Log => ratio.ln(),
        };
      }
    }

    Self::new(returns, assets)
  }

  pub fn returns(&self) -> &Array2<f64> {
    &self.returns
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn n_assets(&self) -> usize {
    self.returns.ncols()
  }

  pub fn n_observations(&self) -> usize {
    self.returns.nrows()
  }

  /// Sample covariance (`ddof = 1`) between asset columns.
  pub fn covariance(&self) -> Result<Array2<f64>> {
    self
      .returns
      .t()
      .cov(1.0)
      .map_err(|e| AllocationError::DataShape(format!("covariance: {e}")))
  }

  /// Sample variance per asset, rejecting constant series.
  pub fn variances(&self) -> Result<Array1<f64>> {
    let cov = self.covariance()?;
    let variances = cov.diag().to_owned();
    self.check_variances(&variances)?;
    Ok(variances)
  }

  /// Sample standard deviation per asset.
  pub fn std_devs(&self) -> Result<Array1<f64>> {
    Ok(self.variances()?.mapv(f64::sqrt))
  }

  /// Pearson correlation matrix.
  ///
  /// A constant return series has no defined correlation and is reported as a
  /// numerical instability for that asset.
  pub fn correlation(&self) -> Result<Array2<f64>> {
    self.variances()?;
    let corr = self
      .returns
      .t()
      .pearson_correlation()
      .map_err(|e| AllocationError::DataShape(format!("correlation: {e}")))?;

    if let Some(((i, _), _)) = corr.indexed_iter().find(|(_, v)| !v.is_finite()) {
      return Err(AllocationError::unstable(i, "non-finite correlation"));
    }

    debug!(
      assets = self.n_assets(),
      observations = self.n_observations(),
      "correlation matrix computed"
    );
    Ok(corr)
  }

  fn check_variances(&self, variances: &Array1<f64>) -> Result<()> {
    for (i, &v) in variances.iter().enumerate() {
      if !v.is_finite() || v <= MIN_VARIANCE {
        return Err(AllocationError::unstable(
          i,
          format!("asset '{}' has zero variance", self.assets[i]),
        ));
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("A{i}")).collect()
  }

  #[test]
  fn rejects_misaligned_names() {
    let r = array![[0.01, 0.02], [0.0, -0.01], [0.02, 0.01]];
    let err = ReturnMatrix::new(r, names(3)).unwrap_err();
    assert!(matches!(err, AllocationError::DataShape(_)));
  }

  #[test]
  fn rejects_empty_and_single_observation() {
    let err = ReturnMatrix::new(Array2::zeros((5, 0)), vec![]).unwrap_err();
    assert!(matches!(err, AllocationError::DataShape(_)));

    let err = ReturnMatrix::new(array![[0.01, 0.02]], names(2)).unwrap_err();
    assert!(matches!(err, AllocationError::DataShape(_)));
  }

  #[test]
  fn rejects_duplicate_names_and_nan() {
    let r = array![[0.01, 0.02], [0.0, -0.01]];
    let err = ReturnMatrix::new(r.clone(), vec!["X".into(), "X".into()]).unwrap_err();
    assert!(matches!(err, AllocationError::DataShape(_)));

    let mut bad = r;
    bad[[1, 1]] = f64::NAN;
    let err = ReturnMatrix::new(bad, names(2)).unwrap_err();
    assert!(matches!(err, AllocationError::DataShape(_)));
  }

  #[test]
  fn simple_and_log_returns_from_prices() {
    let prices = array![[100.0, 10.0], [110.0, 10.0], [99.0, 12.0]];
    let simple = ReturnMatrix::from_prices(&prices, names(2), ReturnKind::Simple).unwrap();
    assert_abs_diff_eq!(simple.returns()[[0, 0]], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(simple.returns()[[1, 0]], -0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(simple.returns()[[1, 1]], 0.2, epsilon = 1e-12);

    let log = ReturnMatrix::from_prices(&prices, names(2), ReturnKind::Log).unwrap();
    assert_abs_diff_eq!(log.returns()[[0, 0]], 1.1_f64.ln(), epsilon = 1e-12);
  }

  #[test]
  fn non_positive_prices_are_rejected() {
    let prices = array![[100.0, 10.0], [0.0, 10.0]];
    let err = ReturnMatrix::from_prices(&prices, names(2), ReturnKind::Simple).unwrap_err();
    assert!(matches!(err, AllocationError::DataShape(_)));
  }

  #[test]
  fn covariance_and_correlation_match_hand_computation() {
    let r = array![[1.0, 1.0], [-1.0, 1.0], [1.0, -1.0], [-1.0, -1.0]];
    let m = ReturnMatrix::new(r, names(2)).unwrap();

    let cov = m.covariance().unwrap();
    assert_abs_diff_eq!(cov[[0, 0]], 4.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[0, 1]], 0.0, epsilon = 1e-12);

    let corr = m.correlation().unwrap();
    assert_abs_diff_eq!(corr[[0, 0]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[0, 1]], 0.0, epsilon = 1e-12);

    let sd = m.std_devs().unwrap();
    assert_abs_diff_eq!(sd[1], (4.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
  }

  #[test]
  fn constant_series_is_numerically_unstable() {
    let r = array![[0.01, 0.02], [0.01, -0.01], [0.01, 0.03]];
    let m = ReturnMatrix::new(r, names(2)).unwrap();
    let err = m.correlation().unwrap_err();
    assert!(matches!(
      err,
      AllocationError::NumericalInstability { index: 0, .. }
    ));
  }
}
