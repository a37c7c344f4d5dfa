//! # Clustering
//!
//! $$
//! \{1,\dots,N\} \xrightarrow{\text{linkage}} \{(a_i,b_i,h_i,n_i)\}_{i=0}^{N-2}
//! $$
//!
//! Agglomerative clustering and the three views derived from its merge history:
//! the explicit cluster tree, the quasi-diagonal leaf order and the merge-height matrix.

pub mod linkage;
pub mod ordering;
pub mod quasi_diag;
pub mod similarity;
pub mod tree;

pub use linkage::linkage;
pub use linkage::Linkage;
pub use linkage::LinkageMethod;
pub use linkage::LinkageRecord;
pub use ordering::adjacent_cost;
pub use quasi_diag::quasi_diagonal_order;
pub use quasi_diag::reorder_matrix;
pub use similarity::closeness;
pub use similarity::similarity_matrix;
pub use tree::ClusterNode;
pub use tree::ClusterTree;
