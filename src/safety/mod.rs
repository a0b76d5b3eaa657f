//! Safety Analysis Module
//!
//! Risk aggregation, data-volume estimation, downtime estimation and the SQL
//! snippets (pre-flight checks, rollback) attached to every report.

pub mod analyzer;
pub mod estimator;
pub mod scripts;

pub use analyzer::SafetyAnalyzer;
pub use estimator::{RowEstimator, StaticEstimator, DEFAULT_ESTIMATE};
