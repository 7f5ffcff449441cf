use super::{steps::Steps, Context, SyncReport};
use crate::{ingest::parse_key, Result};
use chrono::Utc;
use kube::{
    api::{Patch, PatchParams, PostParams},
    Api,
};
use serde_json::json;
use tracing::{debug, info, instrument, Span};
use vmo_core::{defaults, names, InstanceState, InstanceStatus, VerrazzanoMonitoringInstance};

/// Run the convergence pipeline for the instance `namespace/name`
///
/// The instance is read from the cache and defaulted. Every step runs, in pipeline order,
/// whether or not an earlier one failed; failures end up in the returned report. The
/// defaulted spec and the status are written back afterwards, and the applied version is
/// advanced only after a pass that failed nowhere and had nothing left to write.
///
/// An `Err` means the pass could not start or its write-back failed.
#[instrument(skip(ctx), fields(namespace, name))]
pub async fn sync(ctx: &Context, key: &str) -> Result<SyncReport> {
    let (namespace, name) = parse_key(key)?;
    Span::current().record("namespace", namespace).record("name", name);
    if ctx.settings.watch_vmi.as_deref().is_some_and(|only| only != name) {
        debug!("instance not watched");
        return Ok(SyncReport::skipped());
    }
    let Some(observed) = ctx.caches.instance(namespace, name) else {
        debug!("instance no longer exists");
        ctx.metrics.set_locked(namespace, name, false);
        return Ok(SyncReport::skipped());
    };
    if observed.spec.lock {
        info!("instance locked, leaving its objects alone");
        ctx.metrics.set_locked(namespace, name, true);
        return Ok(SyncReport::locked());
    }
    ctx.metrics.set_locked(namespace, name, false);

    let api: Api<VerrazzanoMonitoringInstance> = Api::namespaced(ctx.client.clone(), namespace);
    if observed.metadata.deletion_timestamp.is_some() {
        let status = InstanceStatus {
            state: Some(InstanceState::Terminating),
            ..observed.status.clone().unwrap_or_default()
        };
        write_status(&api, name, observed.status.as_ref(), status).await?;
        return Ok(SyncReport::skipped());
    }

    let config = ctx.config.current();
    let mut vmi = (*observed).clone();
    defaults::initialize(&mut vmi, &config, Utc::now())?;

    let steps = Steps::new(ctx, namespace, name, config);
    let mut report = SyncReport::default();
    report.record("role_bindings", steps.role_bindings(&vmi).await, &ctx.metrics);
    report.record("config_maps", steps.config_maps(&mut vmi).await, &ctx.metrics);
    report.record("services", steps.services(&vmi).await, &ctx.metrics);
    report.record("claims", steps.claims(&vmi).await, &ctx.metrics);
    report.record("workloads", steps.workloads(&vmi).await, &ctx.metrics);
    report.record("ingresses", steps.ingresses(&vmi).await, &ctx.metrics);

    let build = &ctx.settings.build_version;
    let converged = report.is_success() && report.writes() == 0 && vmi.spec == observed.spec;
    if converged && !build.is_empty() && vmi.spec.versioning.current_version != *build {
        info!(version = %build, "advancing applied version");
        vmi.spec.versioning.current_version.clone_from(build);
        report.version_advanced = true;
    }
    if vmi.spec != observed.spec {
        api.replace(name, &PostParams::default(), &vmi).await?;
        info!("instance spec written back");
    }

    let mut status = vmi.status.clone().unwrap_or_default();
    status.hash = names::content_hash(&vmi.spec)?;
    write_status(&api, name, observed.status.as_ref(), status).await?;
    Ok(report)
}

async fn write_status(
    api: &Api<VerrazzanoMonitoringInstance>,
    name: &str,
    observed: Option<&InstanceStatus>,
    status: InstanceStatus,
) -> Result<()> {
    if observed == Some(&status) {
        return Ok(());
    }
    let patch = Patch::Merge(json!({ "status": status }));
    api.patch_status(name, &PatchParams::default(), &patch).await?;
    debug!(state = ?status.state, hash = %status.hash, "status written");
    Ok(())
}
