//! Naming, labelling and ownership conventions shared by every builder
use crate::{crd::VerrazzanoMonitoringInstance, Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Label carrying the owning instance name on every generated object
pub const INSTANCE_LABEL: &str = "verrazzano.io/vmo";
/// Label carrying the component name on every generated object
pub const COMPONENT_LABEL: &str = "verrazzano.io/component";
/// Pod selector label
pub const APP_LABEL: &str = "app";
/// Annotation holding the hash of the desired spec an object was last written from
pub const DESIRED_HASH_ANNOTATION: &str = "verrazzano.io/desired-hash";
/// Name of the custom resource definition
pub const CRD_NAME: &str = "verrazzanomonitoringinstances.verrazzano.io";

/// Static facts about one deployable component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Component {
    /// Short name used in object names
    pub name: &'static str,
    /// Port the component serves on
    pub port: i32,
    /// Container image
    pub image: &'static str,
}

pub const PROMETHEUS: Component = Component {
    name: "prometheus",
    port: 9090,
    image: "quay.io/prometheus/prometheus:v2.44.0",
};
pub const GRAFANA: Component = Component {
    name: "grafana",
    port: 3000,
    image: "docker.io/grafana/grafana:9.5.3",
};
pub const ALERTMANAGER: Component = Component {
    name: "alertmanager",
    port: 9093,
    image: "quay.io/prometheus/alertmanager:v0.25.0",
};
pub const ALERTMANAGER_CLUSTER: Component = Component {
    name: "alertmanager-cluster",
    port: 9094,
    image: "quay.io/prometheus/alertmanager:v0.25.0",
};
pub const KIBANA: Component = Component {
    name: "kibana",
    port: 5601,
    image: "docker.io/opensearchproject/opensearch-dashboards:2.8.0",
};
pub const API: Component = Component {
    name: "api",
    port: 9097,
    image: "ghcr.io/verrazzano/verrazzano-monitoring-instance-api:1.0.0",
};
pub const SEARCH_MASTER: Component = Component {
    name: "es-master",
    port: 9300,
    image: "docker.io/opensearchproject/opensearch:2.8.0",
};
pub const SEARCH_INGEST: Component = Component {
    name: "es-ingest",
    port: 9200,
    image: "docker.io/opensearchproject/opensearch:2.8.0",
};
pub const SEARCH_DATA: Component = Component {
    name: "es-data",
    port: 9200,
    image: "docker.io/opensearchproject/opensearch:2.8.0",
};

/// Port of the search cluster HTTP API on every node
pub const SEARCH_HTTP_PORT: i32 = 9200;

/// `vmi-<instance>-<component>`
pub fn meta_name(instance: &str, component: &str) -> String {
    format!("vmi-{instance}-{component}")
}

/// Pod selector for a component of an instance
pub fn selector(instance: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), meta_name(instance, component))])
}

/// Labels put on every object generated for a component
pub fn labels(instance: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (APP_LABEL.to_string(), meta_name(instance, component)),
    ])
}

/// Whether an object's labels mark it as generated for `instance`
pub fn is_owned_by(labels: &BTreeMap<String, String>, instance: &str) -> bool {
    labels.get(INSTANCE_LABEL).map(String::as_str) == Some(instance)
}

/// The instance's namespace, which every child lives in
pub fn namespace(vmi: &VerrazzanoMonitoringInstance) -> Result<String> {
    vmi.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))
}

/// The instance's name
pub fn instance_name(vmi: &VerrazzanoMonitoringInstance) -> Result<String> {
    vmi.meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))
}

/// Controller owner reference pointing back at the instance
pub fn owner_reference(vmi: &VerrazzanoMonitoringInstance) -> Result<OwnerReference> {
    vmi.controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))
}

/// Metadata for a generated object of `component`
pub fn object_meta(vmi: &VerrazzanoMonitoringInstance, name: String, component: &str) -> Result<ObjectMeta> {
    let instance = instance_name(vmi)?;
    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(namespace(vmi)?),
        labels: Some(labels(&instance, component)),
        owner_references: Some(vec![owner_reference(vmi)?]),
        ..ObjectMeta::default()
    })
}

/// Stable content hash of any serializable value
///
/// Field order follows the struct definitions and maps are ordered, so equal values
/// always hash the same.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(Error::Hash)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}")[..16].to_string())
}

/// Stamp `meta` with the hash of the desired `spec` it was built from
pub fn stamp_desired_hash<T: Serialize>(meta: &mut ObjectMeta, spec: &T) -> Result<()> {
    let hash = content_hash(spec)?;
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(DESIRED_HASH_ANNOTATION.to_string(), hash);
    Ok(())
}

/// The desired hash an object was last written with, if any
pub fn desired_hash(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()?
        .get(DESIRED_HASH_ANNOTATION)
        .map(String::as_str)
}

/// In-cluster HTTP endpoint of the search cluster
pub fn search_http_endpoint(vmi: &VerrazzanoMonitoringInstance) -> Result<String> {
    let instance = instance_name(vmi)?;
    let ns = namespace(vmi)?;
    Ok(format!(
        "http://{}.{ns}.svc.cluster.local:{SEARCH_HTTP_PORT}",
        meta_name(&instance, SEARCH_INGEST.name)
    ))
}
