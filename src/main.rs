use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use hierarchical_allocation::Allocation;
use hierarchical_allocation::AllocationMethod;
use hierarchical_allocation::HierarchicalEngine;
use hierarchical_allocation::HierarchicalEngineConfig;
use hierarchical_allocation::HierarchicalWeights;
use hierarchical_allocation::LinkageMethod;
use hierarchical_allocation::ReturnKind;
use hierarchical_allocation::ReturnMatrix;
use hierarchical_allocation::RiskBudgetConfig;
use ndarray::Array2;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "hierarchical-allocation")]
#[command(about = "Hierarchical clustering portfolio weights from a CSV of returns or prices")]
struct Cli {
  /// CSV file with one column per asset; a leading date column is skipped
  #[arg(short, long)]
  input: PathBuf,

  /// Treat the file as prices and convert them to returns
  #[arg(long)]
  prices: bool,

  /// Use log returns when converting prices
  #[arg(long, requires = "prices")]
  log_returns: bool,

  /// hrp, hcaa or hrb
  #[arg(short, long, default_value = "hrp")]
  method: AllocationMethod,

  /// Linkage rule (single, complete, average, weighted, ward, centroid, median)
  #[arg(short, long)]
  linkage: Option<LinkageMethod>,

  /// Risk-aversion levels for hrb
  #[arg(short, long, num_args = 1.., default_values_t = vec![10.0])]
  gamma: Vec<f64>,

  /// Cluster on the correlation distance directly
  #[arg(long)]
  no_embedding: bool,

  /// Keep the merge order produced by the clusterer
  #[arg(long)]
  no_optimal_ordering: bool,

  /// Print JSON instead of a table
  #[arg(long)]
  json: bool,
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();

  let (assets, values) = read_table(&cli.input)?;
  let returns = if cli.prices {
    let kind = if cli.log_returns {
      ReturnKind::Log
    } else {
      ReturnKind::Simple
    };
    ReturnMatrix::from_prices(&values, assets, kind)?
  } else {
    ReturnMatrix::new(values, assets)?
  };
  info!(
    assets = returns.n_assets(),
    observations = returns.n_observations(),
    "loaded {}",
    cli.input.display()
  );

  let engine = HierarchicalEngine::new(HierarchicalEngineConfig {
    linkage: cli.linkage,
    optimal_ordering: !cli.no_optimal_ordering,
    euclidean_embedding: !cli.no_embedding,
    risk_budget: RiskBudgetConfig {
      gammas: cli.gamma.clone(),
      ..Default::default()
    },
    ..Default::default()
  });

  let allocation = engine
    .allocate(cli.method, &returns)
    .with_context(|| format!("{} allocation failed", cli.method))?;

  if cli.json {
    println!("{}", serde_json::to_string_pretty(&allocation)?);
  } else {
    print_table(returns.assets(), &allocation);
  }
  Ok(())
}

fn csv_builder() -> csv::ReaderBuilder {
  let mut builder = csv::ReaderBuilder::new();
  // ragged rows reach the field count check below instead of failing inside csv
  builder.has_headers(true).flexible(true).trim(csv::Trim::All);
  builder
}

/// Header names and numeric body of a CSV file.
fn read_table(path: &Path) -> anyhow::Result<(Vec<String>, Array2<f64>)> {
  let reader = csv_builder()
    .from_path(path)
    .with_context(|| format!("cannot open {}", path.display()))?;
  parse_table(reader, &path.display().to_string())
}

fn parse_table<R: std::io::Read>(
  mut reader: csv::Reader<R>,
  source: &str,
) -> anyhow::Result<(Vec<String>, Array2<f64>)> {
  let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
  let records = reader
    .records()
    .collect::<Result<Vec<_>, _>>()
    .with_context(|| format!("cannot read {source}"))?;

  let Some(first) = records.first() else {
    bail!("{source} has no data rows");
  };
  let skip = usize::from(first.get(0).is_some_and(|s| s.parse::<f64>().is_err()));
  let assets: Vec<String> = headers.into_iter().skip(skip).collect();
  let n = assets.len();

  let mut values = Vec::with_capacity(records.len() * n);
  for (row, record) in records.iter().enumerate() {
    if record.len() != n + skip {
      bail!(
        "row {} has {} fields, expected {}",
        row + 2,
        record.len(),
        n + skip
      );
    }
    for (col, field) in record.iter().skip(skip).enumerate() {
      let v = field
        .parse::<f64>()
        .with_context(|| format!("row {}, column '{}': '{field}' is not a number", row + 2, assets[col]))?;
      values.push(v);
    }
  }

  let matrix = Array2::from_shape_vec((records.len(), n), values)?;
  Ok((assets, matrix))
}

fn print_weights(assets: &[String], weights: &HierarchicalWeights) {
  println!("{:<16} {:>12}", "asset", "weight");
  for (name, w) in assets.iter().zip(weights.by_asset()) {
    println!("{:<16} {:>12.6}", name, w / weights.basis);
  }
  let order: Vec<&str> = weights
    .leaf_order
    .iter()
    .map(|&i| assets[i].as_str())
    .collect();
  println!("leaf order: {}", order.join(", "));
}

fn print_table(assets: &[String], allocation: &Allocation) {
  match allocation {
    Allocation::RecursiveBisection(w) | Allocation::TreeHalving(w) => print_weights(assets, w),
    Allocation::RiskBudgeting(levels) => {
      for level in levels {
        println!(
          "gamma = {} ({} iterations)",
          level.gamma, level.iterations
        );
        println!("{:<16} {:>12} {:>12}", "asset", "budget", "weight");
        for ((name, b), w) in assets
          .iter()
          .zip(level.budgets.iter())
          .zip(level.weights.iter())
        {
          println!("{:<16} {:>12.4} {:>12.6}", name, b, w);
        }
        println!();
      }
    }
  }
}
