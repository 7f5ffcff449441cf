//! The reconciliation engine
//!
//! [`run`] drives a kube-runtime [`Controller`] over the instance stream. The controller
//! runs at most one pass per instance at a time and collapses triggers that arrive while
//! a pass is pending. [`reconcile`] runs [`sync`] for the instance; a pass that fails on a
//! transient error is scheduled again by [`error_policy`] through per-instance backoff,
//! and a successful pass resets it.
use crate::{
    apply::Outcome,
    backlog::Backlog,
    cache::Caches,
    ingest::{self, LiveConfig},
    metrics::Metrics,
    Error, Result, SearchClient,
};
use futures::{Stream, StreamExt};
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Client, ResourceExt,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vmo_core::VerrazzanoMonitoringInstance;

mod retries;
pub use retries::{Retries, BASE_DELAY, MAX_DELAY};

mod steps;
pub use steps::PIPELINE;

mod sync;
pub use sync::sync;

/// Process-level settings of the engine
#[derive(Clone, Debug)]
pub struct Settings {
    /// Build identifier recorded in `spec.versioning.currentVersion` after a clean pass
    pub build_version: String,
    /// When set, every other instance name is ignored
    pub watch_vmi: Option<String>,
    /// Number of instances reconciled concurrently
    pub workers: usize,
    /// Delay before an instance that converged is looked at again
    pub resync: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_version: String::new(),
            watch_vmi: None,
            workers: 5,
            resync: Duration::from_secs(300),
        }
    }
}

/// Everything a pass needs, shared by all workers
pub struct Context {
    /// Client for every write
    pub client: Client,
    /// Read views over every kind the engine consults
    pub caches: Caches,
    /// Instances triggered but not yet picked up
    pub backlog: Backlog,
    /// Retry delays of failing instances
    pub retries: Retries,
    /// Operator configuration in force
    pub config: LiveConfig,
    /// Operator metrics
    pub metrics: Metrics,
    /// Client for the search clusters of the instances
    pub search: SearchClient,
    /// Process-level settings
    pub settings: Settings,
}

impl Context {
    /// A context with an empty backlog and no recorded failures
    pub fn new(
        client: Client,
        caches: Caches,
        config: LiveConfig,
        metrics: Metrics,
        search: SearchClient,
        settings: Settings,
    ) -> Self {
        Self {
            client,
            caches,
            backlog: Backlog::new(),
            retries: Retries::default(),
            config,
            metrics,
            search,
            settings,
        }
    }
}

/// Result of one pipeline step
#[derive(Debug)]
pub struct StepReport {
    /// Step name, one of [`PIPELINE`]
    pub step: &'static str,
    /// Writes the step issued; empty when it failed
    pub outcome: Outcome,
    /// Why the step failed
    pub error: Option<Error>,
}

/// What one pass over an instance did
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Every step that ran, in pipeline order
    pub steps: Vec<StepReport>,
    /// The pipeline was skipped because the instance is locked
    pub locked: bool,
    /// The pipeline was skipped: the instance is gone, terminating, or not watched
    pub skipped: bool,
    /// `spec.versioning.currentVersion` was advanced to the running build
    pub version_advanced: bool,
}

impl SyncReport {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub(crate) fn locked() -> Self {
        Self {
            locked: true,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, step: &'static str, result: Result<Outcome>, metrics: &Metrics) {
        metrics.step_finished(step, result.is_ok());
        let report = match result {
            Ok(outcome) => StepReport {
                step,
                outcome,
                error: None,
            },
            Err(error) => {
                warn!(step, %error, "step failed");
                StepReport {
                    step,
                    outcome: Outcome::default(),
                    error: Some(error),
                }
            }
        };
        self.steps.push(report);
    }

    /// Whether every step that ran succeeded
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    /// Names of the failed steps, in pipeline order
    pub fn failed(&self) -> Vec<&'static str> {
        self.steps.iter().filter(|s| s.error.is_some()).map(|s| s.step).collect()
    }

    /// Writes issued by the steps
    pub fn writes(&self) -> usize {
        self.steps.iter().map(|s| s.outcome.writes()).sum()
    }

    /// The report of `step`, if it ran
    pub fn step(&self, step: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Collapse into an error naming every failed step
    pub fn into_result(self) -> Result<()> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Pipeline { failed })
        }
    }
}

/// Run one pass over `vmi`
///
/// Waits for the caches to finish their initial listing first. A converged instance is
/// looked at again after [`Settings::resync`].
pub async fn reconcile(vmi: Arc<VerrazzanoMonitoringInstance>, ctx: Arc<Context>) -> Result<Action> {
    let key = ingest::instance_key(&vmi).ok_or_else(|| Error::InvalidKey(vmi.name_any()))?;
    ctx.backlog.picked_up(&key);
    ctx.metrics.set_queue_depth(ctx.backlog.len());
    ctx.caches.synced().await?;
    sync(&ctx, &key).await.and_then(SyncReport::into_result)?;
    debug!(%key, "synced");
    ctx.retries.reset(&key);
    Ok(Action::requeue(ctx.settings.resync))
}

/// Schedule the next pass of an instance whose pass failed
///
/// Transient failures come back after the instance's backoff delay. Anything else waits
/// for the instance to change.
pub fn error_policy(vmi: Arc<VerrazzanoMonitoringInstance>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ingest::instance_key(&vmi).unwrap_or_else(|| vmi.name_any());
    if !error.is_transient() {
        error!(%key, %error, "sync failed, waiting for the instance to change");
        ctx.retries.reset(&key);
        return Action::await_change();
    }
    let delay = ctx.retries.next_delay(&key);
    warn!(%key, %error, retry = ctx.retries.failures(&key), ?delay, "sync failed, requeueing");
    Action::requeue(delay)
}

/// Reconcile the instances reported by `instances` until `token` fires
///
/// Shutdown stops scheduling passes; passes already running are allowed to finish.
pub async fn run<S>(ctx: Arc<Context>, instances: S, token: CancellationToken)
where
    S: Stream<Item = Result<VerrazzanoMonitoringInstance, watcher::Error>> + Send + 'static,
{
    let workers = u16::try_from(ctx.settings.workers.max(1)).unwrap_or(u16::MAX);
    let triggers = ingest::triggers(instances, ctx.backlog.clone(), ctx.settings.watch_vmi.clone());
    info!(workers, "reconciliation started");
    Controller::for_stream(triggers, ctx.caches.instances.clone())
        .with_config(controller::Config::default().concurrency(workers))
        .graceful_shutdown_on(token.cancelled_owned())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| {
            let ctx = ctx.clone();
            async move {
                match result {
                    Ok((instance, action)) => debug!(%instance, ?action, "pass finished"),
                    Err(controller::Error::ObjectNotFound(instance)) => {
                        let namespace = instance.namespace.as_deref().unwrap_or_default();
                        debug!(%instance, "instance deleted");
                        ctx.backlog.picked_up(&format!("{namespace}/{}", instance.name));
                        ctx.metrics.set_locked(namespace, &instance.name, false);
                    }
                    // logged by the error policy
                    Err(controller::Error::ReconcilerFailed(..)) => {}
                    Err(error) => warn!(%error, "controller error"),
                }
            }
        })
        .await;
    info!("reconciliation stopped");
}
