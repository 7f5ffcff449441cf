//! Converging one kind of owned object towards its desired set
//!
//! A [`Plan`] is computed from the cached view: desired objects missing from the cache
//! are created, observed objects that lost any field the desired object sets, or carry
//! another desired-hash annotation, are replaced, and owned objects that are no longer
//! desired are deleted. Executing a plan goes straight to the API and keeps going past
//! individual failures.
use crate::{cache, Result};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, PostParams},
    runtime::reflector::Store,
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{collections::BTreeSet, fmt::Debug};
use tracing::{debug, info, warn};
use vmo_core::names;

/// Bounds every converged kind satisfies
pub trait Owned:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Owned for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Writes issued while executing plans
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Objects created
    pub created: usize,
    /// Objects replaced
    pub updated: usize,
    /// Objects deleted
    pub deleted: usize,
}

impl Outcome {
    /// Total number of writes
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl std::ops::AddAssign for Outcome {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Writes needed to bring one kind in line with its desired set
#[derive(Debug)]
pub struct Plan<K> {
    /// Objects to create
    pub create: Vec<K>,
    /// Objects to replace, already carrying the observed resource version
    pub update: Vec<K>,
    /// Names of owned objects to delete
    pub delete: Vec<String>,
}

impl<K> Default for Plan<K> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }
}

/// Compare `desired` against the cache
///
/// `carry` copies server-assigned fields from the observed object onto a replacement.
pub fn plan_with<K, F>(
    store: &Store<K>,
    namespace: &str,
    instance: &str,
    desired: Vec<K>,
    carry: F,
) -> Plan<K>
where
    K: Owned,
    F: Fn(&K, &mut K),
{
    let mut plan = Plan::default();
    let wanted: BTreeSet<String> = desired.iter().map(|d| d.name_any()).collect();
    for mut object in desired {
        let name = object.name_any();
        match cache::get(store, namespace, &name) {
            None => plan.create.push(object),
            Some(observed) => {
                if is_converged(&*observed, &object) {
                    continue;
                }
                object.meta_mut().resource_version = observed.resource_version();
                carry(&observed, &mut object);
                plan.update.push(object);
            }
        }
    }
    plan.delete = cache::owned_by(store, namespace, instance)
        .into_iter()
        .map(|o| o.name_any())
        .filter(|name| !wanted.contains(name))
        .collect();
    plan
}

/// Whether `observed` still carries everything `desired` sets
///
/// Metadata and status are left out apart from the desired-hash annotation. Fields the
/// desired object leaves unset belong to the server and never count as drift.
pub fn is_converged<K: Owned>(observed: &K, desired: &K) -> bool {
    if names::desired_hash(observed.meta()) != names::desired_hash(desired.meta()) {
        return false;
    }
    let (Ok(mut observed), Ok(mut desired)) = (serde_json::to_value(observed), serde_json::to_value(desired))
    else {
        return false;
    };
    for value in [&mut observed, &mut desired] {
        if let Some(fields) = value.as_object_mut() {
            fields.remove("metadata");
            fields.remove("status");
        }
    }
    contains(&observed, &desired)
}

fn contains(observed: &Value, desired: &Value) -> bool {
    match (observed, desired) {
        (Value::Object(observed), Value::Object(desired)) => desired.iter().all(|(key, wanted)| {
            match observed.get(key) {
                Some(found) if !found.is_null() => contains(found, wanted),
                _ => is_unset(wanted),
            }
        }),
        (Value::Array(observed), Value::Array(desired)) => {
            observed.len() == desired.len() && observed.iter().zip(desired).all(|(o, d)| contains(o, d))
        }
        (observed, desired) => observed == desired,
    }
}

// the server drops empty collections and strings
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// [`plan_with`] for kinds without server-assigned spec fields
pub fn plan<K: Owned>(store: &Store<K>, namespace: &str, instance: &str, desired: Vec<K>) -> Plan<K> {
    plan_with(store, namespace, instance, desired, |_, _| {})
}

impl<K: Owned> Plan<K> {
    /// Whether nothing needs to be written
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Issue every write of the plan
    ///
    /// Every write is attempted even after a failure; the first failure is returned.
    pub async fn execute(self, api: &Api<K>) -> Result<Outcome> {
        let mut outcome = Outcome::default();
        let mut first_error = None;
        for object in &self.create {
            match create(api, object).await {
                Ok(_) => outcome.created += 1,
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        for object in &self.update {
            match replace(api, object).await {
                Ok(_) => outcome.updated += 1,
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        for name in &self.delete {
            match delete(api, name).await {
                Ok(deleted) => outcome.deleted += usize::from(deleted),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        first_error.map_or(Ok(outcome), Err)
    }
}

/// Create one object
pub async fn create<K: Owned>(api: &Api<K>, object: &K) -> Result<K> {
    let created = api.create(&PostParams::default(), object).await.inspect_err(|error| {
        warn!(kind = %K::kind(&()), name = %object.name_any(), %error, "create failed");
    })?;
    info!(kind = %K::kind(&()), name = %object.name_any(), "created");
    Ok(created)
}

/// Replace one object, guarded by the resource version it carries
pub async fn replace<K: Owned>(api: &Api<K>, object: &K) -> Result<K> {
    let name = object.name_any();
    let replaced = api.replace(&name, &PostParams::default(), object).await.inspect_err(|error| {
        warn!(kind = %K::kind(&()), %name, %error, "update failed");
    })?;
    info!(kind = %K::kind(&()), %name, "updated");
    Ok(replaced)
}

/// Delete one object; returns `false` when it was already gone
pub async fn delete<K: Owned>(api: &Api<K>, name: &str) -> Result<bool> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(kind = %K::kind(&()), name, "deleted");
            Ok(true)
        }
        Err(kube::Error::Api(status)) if status.code == 404 => {
            debug!(kind = %K::kind(&()), name, "already deleted");
            Ok(false)
        }
        Err(error) => {
            warn!(kind = %K::kind(&()), name, %error, "delete failed");
            Err(error.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::stores, fake::ApiServer};
    use k8s_openapi::{
        api::core::v1::{Service, ServiceSpec},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use kube::runtime::watcher::Event;
    use std::collections::BTreeMap;

    fn service(name: &str, hash: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("monitoring".into()),
                labels: Some(names::labels("system", "grafana")),
                annotations: Some(BTreeMap::from([(
                    names::DESIRED_HASH_ANNOTATION.to_string(),
                    hash.to_string(),
                )])),
                resource_version: Some("7".into()),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }
    }

    fn store_with(objects: Vec<Service>) -> Store<Service> {
        let (caches, mut writers) = stores();
        writers.services.apply_watcher_event(&Event::Init);
        for object in objects {
            writers.services.apply_watcher_event(&Event::InitApply(object));
        }
        writers.services.apply_watcher_event(&Event::InitDone);
        caches.services
    }

    #[test]
    fn plan_creates_updates_and_prunes() {
        let store = store_with(vec![service("same", "a"), service("drifted", "a"), service("stale", "a")]);
        let desired = vec![service("same", "a"), service("drifted", "b"), service("new", "a")];
        let plan = plan_with(&store, "monitoring", "system", desired, |observed, desired| {
            desired.spec = observed.spec.clone();
        });
        let names = |objects: &[Service]| objects.iter().map(|o| o.name_any()).collect::<Vec<_>>();
        assert_eq!(names(&plan.create), ["new"]);
        assert_eq!(names(&plan.update), ["drifted"]);
        assert_eq!(plan.update[0].resource_version().as_deref(), Some("7"));
        assert_eq!(plan.delete, ["stale"]);
    }

    #[test]
    fn out_of_band_edit_is_reverted() {
        let mut edited = service("api", "x");
        edited.spec = Some(ServiceSpec {
            type_: Some("NodePort".into()),
            ..ServiceSpec::default()
        });
        let mut desired = service("api", "x");
        desired.spec = Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            ..ServiceSpec::default()
        });
        let store = store_with(vec![edited]);
        let plan = plan(&store, "monitoring", "system", vec![desired]);
        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].spec.as_ref().unwrap().type_.as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn server_filled_fields_are_not_drift() {
        let mut observed = service("api", "x");
        observed.spec = Some(ServiceSpec {
            cluster_ip: Some("10.0.0.7".into()),
            type_: Some("ClusterIP".into()),
            ..ServiceSpec::default()
        });
        let mut desired = service("api", "x");
        desired.spec = Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            external_ips: Some(vec![]),
            ..ServiceSpec::default()
        });
        assert!(is_converged(&observed, &desired));
        let store = store_with(vec![observed]);
        assert!(plan(&store, "monitoring", "system", vec![desired]).is_empty());
    }

    #[test]
    fn converged_kind_has_empty_plan() {
        let store = store_with(vec![service("a", "x")]);
        assert!(plan(&store, "monitoring", "system", vec![service("a", "x")]).is_empty());
    }

    #[tokio::test]
    async fn execute_continues_past_failures() {
        let server = ApiServer::new();
        server.insert(&service("stale", "a"));
        server.fail("POST", "services");
        let api: Api<Service> = Api::namespaced(server.client(), "monitoring");
        let plan = Plan {
            create: vec![service("new", "a")],
            update: vec![],
            delete: vec!["stale".into(), "gone".into()],
        };
        let err = plan.execute(&api).await.unwrap_err();
        assert!(err.is_transient());
        // the failed create did not stop the deletes, and the missing object is no error
        assert_eq!(server.writes(), ["DELETE services/stale"]);
        assert!(server.get::<Service>("monitoring", "stale").is_none());
    }
}
