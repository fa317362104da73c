//! The scaling core for nightshift
//!
//! Resolves a namespaces workloads into priority groups, judges whether a
//! group has converged, derives the externally visible phase, and applies
//! desired replica counts in strict priority order.

mod executor;
mod phase;
mod readiness;
mod resolve;

pub use executor::{scale_target, ScaleOutcome};
pub use phase::compute_phase;
pub use readiness::is_group_ready;
pub use resolve::priority_groups;
