//! Scales namespaces down and back up on a schedule
//!
//! Nightshift watches ScalingConfig and ScalingGroup resources and drives
//! the Deployments and StatefulSets they cover to zero outside their
//! scheduled windows, restoring the original replica counts on the way
//! back up.

pub mod args;
pub mod conf;
pub mod libs;

pub use conf::Conf;
pub use libs::Error;
