//! The pipeline steps, one per owned kind
//!
//! Every step derives its desired objects from the defaulted instance, diffs them against
//! the caches and writes the difference. Steps never depend on one another succeeding.
use super::Context;
use crate::{
    apply::{self, Outcome, Owned, Plan},
    cache, Error, Result, SearchClient,
};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{runtime::reflector::Store, Api, ResourceExt};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, instrument, warn};
use vmo_core::{
    builders::{self, Artifact, ArtifactPolicy, Workloads},
    merge, names, OperatorConfig, VerrazzanoMonitoringInstance,
};

/// Step names in pipeline order
pub const PIPELINE: [&str; 6] = [
    "role_bindings",
    "config_maps",
    "services",
    "claims",
    "workloads",
    "ingresses",
];

pub(crate) struct Steps<'a> {
    ctx: &'a Context,
    namespace: &'a str,
    instance: &'a str,
    config: Arc<OperatorConfig>,
    search: SearchClient,
}

fn is_search_data(labels: &std::collections::BTreeMap<String, String>) -> bool {
    labels.get(names::COMPONENT_LABEL).map(String::as_str) == Some(names::SEARCH_DATA.name)
}

impl<'a> Steps<'a> {
    pub(crate) fn new(
        ctx: &'a Context,
        namespace: &'a str,
        instance: &'a str,
        config: Arc<OperatorConfig>,
    ) -> Self {
        let timeout = std::time::Duration::from_secs(config.search_cluster_timeout_seconds);
        Self {
            ctx,
            namespace,
            instance,
            search: ctx.search.clone().with_timeout(timeout),
            config,
        }
    }

    fn api<K: Owned>(&self) -> Api<K> {
        Api::namespaced(self.ctx.client.clone(), self.namespace)
    }

    fn plan<K: Owned>(&self, store: &Store<K>, desired: Vec<K>) -> Plan<K> {
        apply::plan(store, self.namespace, self.instance, desired)
    }

    #[instrument(skip_all, fields(step = "role_bindings"))]
    pub(crate) async fn role_bindings(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<Outcome> {
        let desired = builders::role_bindings(vmi)?;
        self.plan(&self.ctx.caches.role_bindings, desired)
            .execute(&self.api())
            .await
    }

    /// Create, merge and prune config artifacts
    ///
    /// Consumes `spec.alertmanager.config` when the alert router artifact is created from
    /// it. A seed given after that is left in the spec untouched.
    #[instrument(skip_all, fields(step = "config_maps"))]
    pub(crate) async fn config_maps(&self, vmi: &mut VerrazzanoMonitoringInstance) -> Result<Outcome> {
        let api = self.api::<ConfigMap>();
        let artifacts = builders::config_maps(vmi, &self.config)?;
        let mut outcome = Outcome::default();
        let mut first_error = None;
        let mut router_seeded = false;
        for artifact in &artifacts {
            match self.artifact(&api, artifact).await {
                Ok(written) => {
                    outcome += written;
                    router_seeded |=
                        written.created == 1 && artifact.name() == vmi.spec.alertmanager.config_map;
                }
                Err(error) => {
                    warn!(artifact = artifact.name(), %error, "config artifact not reconciled");
                    first_error.get_or_insert(error);
                }
            }
        }
        if router_seeded && !vmi.spec.alertmanager.config.is_empty() {
            debug!("alert router configuration consumed");
            vmi.spec.alertmanager.config.clear();
        }

        let wanted: BTreeSet<&str> = artifacts.iter().map(Artifact::name).collect();
        let stale = Plan {
            delete: cache::owned_by(&self.ctx.caches.config_maps, self.namespace, self.instance)
                .iter()
                .map(|cm| cm.name_any())
                .filter(|name| !wanted.contains(name.as_str()))
                .collect(),
            ..Plan::default()
        };
        match (stale.execute(&api).await, first_error) {
            (Ok(deleted), None) => {
                outcome += deleted;
                Ok(outcome)
            }
            (_, Some(error)) | (Err(error), None) => Err(error),
        }
    }

    async fn artifact(&self, api: &Api<ConfigMap>, artifact: &Artifact) -> Result<Outcome> {
        let Some(existing) = cache::get(&self.ctx.caches.config_maps, self.namespace, artifact.name()) else {
            apply::create(api, &artifact.config_map).await?;
            return Ok(Outcome {
                created: 1,
                ..Outcome::default()
            });
        };
        let current = existing.data.clone().unwrap_or_default();
        let merged = match &artifact.policy {
            ArtifactPolicy::CreateOnce => None,
            ArtifactPolicy::ReservedKeys { prefix } => {
                let merged = merge::merge_reserved_keys(&current, &artifact.data(), prefix);
                (merged != current).then_some(merged)
            }
            ArtifactPolicy::ScrapeJobs { key } => {
                merge::reconcile_scrape_artifact(key, &current, &artifact.data())?
            }
        };
        let Some(data) = merged else {
            return Ok(Outcome::default());
        };
        let mut updated = (*existing).clone();
        updated.data = Some(data);
        apply::replace(api, &updated).await?;
        Ok(Outcome {
            updated: 1,
            ..Outcome::default()
        })
    }

    #[instrument(skip_all, fields(step = "services"))]
    pub(crate) async fn services(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<Outcome> {
        let desired = builders::services(vmi)?;
        // the cluster IP is allocated by the server and immutable
        let plan = apply::plan_with(
            &self.ctx.caches.services,
            self.namespace,
            self.instance,
            desired,
            |observed: &Service, desired: &mut Service| {
                if let (Some(observed), Some(desired)) = (&observed.spec, desired.spec.as_mut()) {
                    desired.cluster_ip.clone_from(&observed.cluster_ip);
                    desired.cluster_ips.clone_from(&observed.cluster_ips);
                }
            },
        );
        plan.execute(&self.api()).await
    }

    #[instrument(skip_all, fields(step = "claims"))]
    pub(crate) async fn claims(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<Outcome> {
        let desired = builders::claims(vmi, &self.config)?;
        let store = &self.ctx.caches.claims;
        let mut plan = self.plan(store, desired);
        let gate = self.gate_scale_in(vmi, store, &mut plan).await;
        let outcome = plan.execute(&self.api()).await?;
        gate.map(|()| outcome)
    }

    /// Converge deployments and stateful sets, gating search data node changes
    #[instrument(skip_all, fields(step = "workloads"))]
    pub(crate) async fn workloads(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<Outcome> {
        let secret = &vmi.spec.secrets_name;
        if !secret.is_empty() && self.ctx.caches.secret(self.namespace, secret).is_none() {
            return Err(Error::MissingSecret(format!("{}/{secret}", self.namespace)));
        }
        let Workloads {
            deployments,
            stateful_sets,
        } = builders::workloads(vmi)?;

        let store = &self.ctx.caches.deployments;
        let mut plan = self.plan(store, deployments);
        let scale_in = self.gate_scale_in(vmi, store, &mut plan).await;
        let update = self.gate_data_updates(vmi, &mut plan).await;
        let deployments = plan.execute(&self.api()).await;
        let stateful_sets = self
            .plan(&self.ctx.caches.stateful_sets, stateful_sets)
            .execute(&self.api())
            .await;
        if vmi.spec.elasticsearch.enabled {
            self.provision_policies(vmi);
        }

        let mut outcome = deployments?;
        outcome += stateful_sets?;
        scale_in?;
        update?;
        Ok(outcome)
    }

    #[instrument(skip_all, fields(step = "ingresses"))]
    pub(crate) async fn ingresses(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<Outcome> {
        let desired = builders::ingresses(vmi)?;
        self.plan(&self.ctx.caches.ingresses, desired)
            .execute(&self.api())
            .await
    }

    /// Hold back deletion of search data objects unless the cluster may be resized
    async fn gate_scale_in<K: Owned>(
        &self,
        vmi: &VerrazzanoMonitoringInstance,
        store: &Store<K>,
        plan: &mut Plan<K>,
    ) -> Result<()> {
        if !vmi.spec.elasticsearch.enabled {
            return Ok(());
        }
        let data: Vec<String> = plan
            .delete
            .iter()
            .filter(|name| {
                cache::get(store, self.namespace, name).is_some_and(|o| is_search_data(o.labels()))
            })
            .cloned()
            .collect();
        if data.is_empty() {
            return Ok(());
        }
        let minimum = self.config.min_data_nodes_for_resize;
        if let Err(error) = self.search.check_resizable(vmi, minimum).await {
            warn!(%error, held = ?data, "search data nodes not removed");
            plan.delete.retain(|name| !data.contains(name));
            return Err(error);
        }
        Ok(())
    }

    /// Hold back updates of live search data nodes unless the cluster is up to date
    async fn gate_data_updates<K: Owned>(
        &self,
        vmi: &VerrazzanoMonitoringInstance,
        plan: &mut Plan<K>,
    ) -> Result<()> {
        if !vmi.spec.elasticsearch.enabled || !plan.update.iter().any(|o| is_search_data(o.labels())) {
            return Ok(());
        }
        if let Err(error) = self.search.check_updated(vmi).await {
            warn!(%error, "search data node updates held back");
            plan.update.retain(|o| !is_search_data(o.labels()));
            return Err(error);
        }
        Ok(())
    }

    /// Provision lifecycle policies without waiting for the outcome
    fn provision_policies(&self, vmi: &VerrazzanoMonitoringInstance) {
        let done = self.search.configure_policies(vmi);
        let instance = format!("{}/{}", self.namespace, self.instance);
        tokio::spawn(async move {
            match done.await {
                Ok(Ok(())) => debug!(%instance, "lifecycle policies in place"),
                Ok(Err(error)) => warn!(%instance, %error, "lifecycle policy provisioning failed"),
                Err(_) => {
                    let error = Error::PolicyTaskLost;
                    warn!(%instance, %error, "lifecycle policy provisioning failed");
                }
            }
        });
    }
}
