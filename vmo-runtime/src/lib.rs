//! Runtime of the monitoring operator
//!
//! This crate holds everything that talks to the cluster or to the search cluster:
//! the cached views fed by reflectors, event ingestion, the reconciliation engine in
//! [`controller`] built on the kube-runtime controller, the search-cluster health gate,
//! metrics and the management server.
#![deny(unsafe_code)]

pub mod apply;
pub mod backlog;
pub use backlog::Backlog;

pub mod cache;
pub use cache::Caches;

pub mod controller;
pub use controller::{Context, Settings, SyncReport};

pub mod ingest;
pub use ingest::LiveConfig;

pub mod metrics;
pub use metrics::Metrics;

pub mod search;
pub use search::SearchClient;

pub mod server;

mod error;
pub use error::Error;

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod fake;
