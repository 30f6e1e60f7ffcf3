//! What the repository says exists, and what the user changed locally.

mod modified;
mod tree;

pub use modified::{ModificationSummary, ModifiedKind, ModifiedPaths};
pub use tree::{ProjectedEntry, Projection};
