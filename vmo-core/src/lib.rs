//! Client-less types and algorithms for the monitoring operator
//!
//! Everything in this crate is deterministic and free of I/O: the custom resource types,
//! operator configuration parsing, naming conventions, spec defaulting, the desired-state
//! builders for every owned object kind, and the merge rules that keep user edits alive
//! inside generated config artifacts. The same items are re-exported from `vmo` under `vmo::core`.
#![deny(unsafe_code)]

pub mod builders;

pub mod config;
pub use config::OperatorConfig;

pub mod crd;
pub use crd::{InstanceSpec, InstanceState, InstanceStatus, VerrazzanoMonitoringInstance};

pub mod defaults;

pub mod merge;

pub mod names;

pub mod sequence;
pub use sequence::{ensure_claim_names, next_in_sequence};

mod error;
pub use error::Error;

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
