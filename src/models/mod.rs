//! Data models
//!
//! Value types shared by every stage of the guardian pipeline: parsed model
//! declarations, detected changes, and the reports built from them.

pub mod change;
pub mod report;
pub mod schema;

// Re-export commonly used types
pub use change::*;
pub use report::*;
pub use schema::*;
