//! Verrazzano monitoring operator
//!
//! Converges the monitoring stack described by a `VerrazzanoMonitoringInstance` custom
//! resource: a metrics server, dashboards, an alert router, a search cluster with its
//! log viewer, and a public API, together with the config artifacts, storage claims,
//! network endpoints and ingress routes they need.
//!
//! The crate re-exports the two halves of the operator:
//!
//! - [`core`] with the custom resource types, naming rules, spec defaulting, the
//!   desired-state builders and the config-artifact merge rules. Nothing in it does I/O.
//! - [`runtime`] with the cached views, the reconciliation engine driven by the
//!   kube-runtime controller, the search-cluster health gate, metrics and the
//!   management server.
//!
//! # Running one pass by hand
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use vmo::runtime::{cache, controller, Context, LiveConfig, Metrics, SearchClient, Settings};
//!
//! # async fn doc() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let token = tokio_util::sync::CancellationToken::new();
//! let (caches, writers) = cache::stores();
//! let (_reflectors, instances) = writers.spawn(&client, Some("monitoring"), &token);
//! let ctx = Arc::new(Context::new(
//!     client,
//!     caches,
//!     LiveConfig::default(),
//!     Metrics::new()?,
//!     SearchClient::new(Duration::from_secs(10))?,
//!     Settings::default(),
//! ));
//! // the controller drives the instance stream; this pass runs next to it
//! tokio::spawn(controller::run(ctx.clone(), instances, token.clone()));
//! ctx.caches.wait_until_ready(Duration::from_secs(60)).await?;
//!
//! let report = controller::sync(&ctx, "monitoring/system").await?;
//! println!("failed steps: {:?}", report.failed());
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub use vmo_core as core;
pub use vmo_runtime as runtime;

pub use vmo_core::{
    InstanceSpec, InstanceState, InstanceStatus, OperatorConfig, VerrazzanoMonitoringInstance,
};
pub use vmo_runtime::{Context, Error, Result};
