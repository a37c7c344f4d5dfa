//! # Allocation
//!
//! $$
//! Z \mapsto \mathbf w,\qquad
//! \mathbf w \in \{\text{bisection},\ \text{halving},\ \text{risk budget}\}
//! $$
//!
//! The three weight allocators and the engine that feeds them.

pub mod bisection;
pub mod engine;
pub mod risk_budget;
pub mod solver;
pub mod tree_halving;
pub mod types;

pub use engine::HierarchicalEngine;
pub use engine::HierarchicalEngineConfig;
pub use risk_budget::RiskBudgetConfig;
pub use solver::ProjectedGradient;
pub use types::Allocation;
pub use types::AllocationMethod;
pub use types::HierarchicalWeights;
pub use types::RiskBudgetAllocation;
