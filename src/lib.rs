//! # Hierarchical Allocation
//!
//! $$
//! R \mapsto \rho \mapsto d_{ij}=\sqrt{\tfrac12(1-\rho_{ij})} \mapsto \text{linkage} \mapsto \mathbf{w}
//! $$
//!
//! Portfolio weights from the hierarchical structure of asset co-movement.
//!
//! The pipeline turns a return matrix into a Mantegna distance matrix, embeds it
//! with a second-order Euclidean distance, clusters the assets agglomeratively and
//! feeds the merge history into one of three allocators:
//!
//! - [`allocation::bisection`]: recursive bisection over the quasi-diagonal order (HRP),
//! - [`allocation::tree_halving`]: top-down halving over the cluster tree (HCAA),
//! - [`allocation::risk_budget`]: cluster-similarity risk budgeting (HRB).
//!
//! [`allocation::HierarchicalEngine`] wires the stages together.

pub mod allocation;
pub mod cluster;
pub mod data;
pub mod distance;
pub mod error;

pub use allocation::Allocation;
pub use allocation::AllocationMethod;
pub use allocation::HierarchicalEngine;
pub use allocation::HierarchicalEngineConfig;
pub use allocation::HierarchicalWeights;
pub use allocation::RiskBudgetAllocation;
pub use allocation::RiskBudgetConfig;
pub use cluster::Linkage;
pub use cluster::LinkageMethod;
pub use cluster::LinkageRecord;
pub use data::ReturnKind;
pub use data::ReturnMatrix;
pub use error::AllocationError;
pub use error::Result;
