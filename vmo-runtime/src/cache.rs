//! Cached read-through views of every kind the operator reads
//!
//! Each kind is mirrored by a reflector into a [`Store`]. Reads go to the stores, writes
//! always go to the API. Owned kinds are only watched with the instance label, so the
//! caches never hold objects the operator did not create.
use crate::{Error, Result};
use futures::{future, Stream, StreamExt};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, StatefulSet},
        core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service},
        networking::v1::Ingress,
        rbac::v1::RoleBinding,
    },
    NamespaceResourceScope,
};
use kube::{
    runtime::{
        reflector::{self, store::Writer, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vmo_core::{names, VerrazzanoMonitoringInstance};

/// Read views over every kind the engine consults
#[derive(Clone)]
pub struct Caches {
    /// Every instance in the watched namespaces
    pub instances: Store<VerrazzanoMonitoringInstance>,
    /// Owned config artifacts
    pub config_maps: Store<ConfigMap>,
    /// Owned services
    pub services: Store<Service>,
    /// Owned storage claims
    pub claims: Store<PersistentVolumeClaim>,
    /// Owned deployments
    pub deployments: Store<Deployment>,
    /// Owned stateful sets, the search master nodes
    pub stateful_sets: Store<StatefulSet>,
    /// Owned ingresses
    pub ingresses: Store<Ingress>,
    /// Owned role bindings
    pub role_bindings: Store<RoleBinding>,
    /// Every secret, for the credentials check
    pub secrets: Store<Secret>,
}

/// Write halves of [`Caches`], consumed by [`Writers::spawn`]
pub struct Writers {
    pub(crate) instances: Writer<VerrazzanoMonitoringInstance>,
    pub(crate) config_maps: Writer<ConfigMap>,
    pub(crate) services: Writer<Service>,
    pub(crate) claims: Writer<PersistentVolumeClaim>,
    pub(crate) deployments: Writer<Deployment>,
    pub(crate) stateful_sets: Writer<StatefulSet>,
    pub(crate) ingresses: Writer<Ingress>,
    pub(crate) role_bindings: Writer<RoleBinding>,
    pub(crate) secrets: Writer<Secret>,
}

/// Fresh, empty caches together with their writers
pub fn stores() -> (Caches, Writers) {
    let (instances, instances_w) = reflector::store();
    let (config_maps, config_maps_w) = reflector::store();
    let (services, services_w) = reflector::store();
    let (claims, claims_w) = reflector::store();
    let (deployments, deployments_w) = reflector::store();
    let (stateful_sets, stateful_sets_w) = reflector::store();
    let (ingresses, ingresses_w) = reflector::store();
    let (role_bindings, role_bindings_w) = reflector::store();
    let (secrets, secrets_w) = reflector::store();
    (
        Caches {
            instances,
            config_maps,
            services,
            claims,
            deployments,
            stateful_sets,
            ingresses,
            role_bindings,
            secrets,
        },
        Writers {
            instances: instances_w,
            config_maps: config_maps_w,
            services: services_w,
            claims: claims_w,
            deployments: deployments_w,
            stateful_sets: stateful_sets_w,
            ingresses: ingresses_w,
            role_bindings: role_bindings_w,
            secrets: secrets_w,
        },
    )
}

impl Writers {
    /// Start one reflector per kind
    ///
    /// Instance events are not consumed here: the returned stream yields every instance
    /// that was applied or deleted and is meant to drive the controller. All other
    /// reflectors stop when `token` fires.
    pub fn spawn(
        self,
        client: &Client,
        watch_namespace: Option<&str>,
        token: &CancellationToken,
    ) -> (
        JoinSet<()>,
        impl Stream<Item = std::result::Result<VerrazzanoMonitoringInstance, watcher::Error>>
            + Send
            + 'static,
    ) {
        let owned = watcher::Config::default().labels(names::INSTANCE_LABEL);
        let mut tasks = JoinSet::new();
        reflect(&mut tasks, api(client, watch_namespace), owned.clone(), self.config_maps, token);
        reflect(&mut tasks, api(client, watch_namespace), owned.clone(), self.services, token);
        reflect(&mut tasks, api(client, watch_namespace), owned.clone(), self.claims, token);
        reflect(&mut tasks, api(client, watch_namespace), owned.clone(), self.deployments, token);
        reflect(&mut tasks, api(client, watch_namespace), owned.clone(), self.stateful_sets, token);
        reflect(&mut tasks, api(client, watch_namespace), owned.clone(), self.ingresses, token);
        reflect(&mut tasks, api(client, watch_namespace), owned, self.role_bindings, token);
        let all = watcher::Config::default();
        reflect(&mut tasks, api(client, watch_namespace), all.clone(), self.secrets, token);

        let instances = watcher(api(client, watch_namespace), all)
            .default_backoff()
            .reflect(self.instances)
            .touched_objects();
        (tasks, instances)
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn reflect<K>(
    tasks: &mut JoinSet<()>,
    api: Api<K>,
    config: watcher::Config,
    writer: Writer<K>,
    token: &CancellationToken,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let token = token.clone();
    let stream = watcher(api, config)
        .default_backoff()
        .reflect(writer)
        .touched_objects()
        .for_each(move |event| {
            if let Err(error) = event {
                warn!(%kind, %error, "watch failed, retrying");
            }
            future::ready(())
        });
    tasks.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = stream => {}
        }
    });
}

impl Caches {
    /// Wait until every store has completed its initial listing
    ///
    /// Fails when a reflector died before its store was ready.
    pub async fn synced(&self) -> Result<()> {
        let results = [
            self.instances.wait_until_ready().await,
            self.config_maps.wait_until_ready().await,
            self.services.wait_until_ready().await,
            self.claims.wait_until_ready().await,
            self.deployments.wait_until_ready().await,
            self.stateful_sets.wait_until_ready().await,
            self.ingresses.wait_until_ready().await,
            self.role_bindings.wait_until_ready().await,
            self.secrets.wait_until_ready().await,
        ];
        if results.iter().all(std::result::Result::is_ok) {
            Ok(())
        } else {
            Err(Error::CacheSyncFailed)
        }
    }

    /// [`Caches::synced`], giving up after `timeout`
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.synced()).await {
            Ok(synced) => {
                synced?;
                debug!("caches synced");
                Ok(())
            }
            Err(_) => Err(Error::CacheSyncTimeout(timeout)),
        }
    }

    /// The cached instance `namespace/name`
    pub fn instance(&self, namespace: &str, name: &str) -> Option<Arc<VerrazzanoMonitoringInstance>> {
        self.instances.get(&ObjectRef::new(name).within(namespace))
    }

    /// The cached secret `namespace/name`
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Arc<Secret>> {
        self.secrets.get(&ObjectRef::new(name).within(namespace))
    }
}

/// Look up one object of a namespaced kind
pub fn get<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store.get(&ObjectRef::new(name).within(namespace))
}

/// Every cached object in `namespace` labelled as generated for `instance`
pub fn owned_by<K>(store: &Store<K>, namespace: &str, instance: &str) -> Vec<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .into_iter()
        .filter(|obj| {
            obj.namespace().as_deref() == Some(namespace) && names::is_owned_by(obj.labels(), instance)
        })
        .collect()
}
