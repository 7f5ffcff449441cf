//! The `VerrazzanoMonitoringInstance` custom resource
//!
//! `spec` declares which monitoring components run and how they are sized.
//! The status holds what the operator observed and derived on its last pass.
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of one monitoring stack
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "verrazzano.io",
    version = "v1",
    kind = "VerrazzanoMonitoringInstance",
    plural = "verrazzanomonitoringinstances",
    namespaced
)]
#[kube(status = "InstanceStatus", shortname = "vmi")]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// When set, the operator leaves every owned object of this instance untouched
    #[serde(default)]
    pub lock: bool,
    /// Version bookkeeping polled by rollout tooling
    #[serde(default)]
    pub versioning: Versioning,
    /// Base DNS name; ingress routes are only created when this is set
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Name of the secret holding the credentials of the stack
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secrets_name: String,
    /// Name of the basic-auth secret used by the ingress routes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
    /// Type of the generated network endpoints, `ClusterIP` when unset
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_type: String,
    /// Storage class for generated claims; falls back to the operator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// The metrics server
    #[serde(default)]
    pub prometheus: Prometheus,
    /// The dashboard server
    #[serde(default)]
    pub grafana: Grafana,
    /// The alert router
    #[serde(default)]
    pub alertmanager: AlertManager,
    /// The log/search cluster
    #[serde(default)]
    pub elasticsearch: Elasticsearch,
    /// The log viewer
    #[serde(default)]
    pub kibana: Kibana,
    /// The public API
    #[serde(default)]
    pub api: PublicApi,
}

/// Version bookkeeping
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Versioning {
    /// Build identifier of the operator that last converged this instance without changes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,
}

/// Persistent storage request of a component
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// Requested size as a quantity string, e.g. `50Gi`. Empty means no storage.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    /// Claim names bound to replica ordinals, maintained by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pvc_names: Vec<String>,
}

impl Storage {
    /// Whether any storage was requested
    pub fn is_configured(&self) -> bool {
        !self.size.is_empty()
    }
}

/// Metrics server settings
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Prometheus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub storage: Storage,
    /// Scrape configuration artifact
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_map: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub versions_config_map: String,
    /// Alert rule artifact
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rules_config_map: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rules_versions_config_map: String,
    /// Retention in days
    #[serde(default)]
    pub retention_period: i32,
}

/// Dashboard server settings
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Grafana {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dashboards_config_map: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datasources_config_map: String,
}

/// Alert router settings
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertManager {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: i32,
    /// Initial router configuration; consumed when the artifact is first created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_map: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub versions_config_map: String,
}

/// Role of a search-cluster node group
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Ingest,
    Data,
}

impl NodeRole {
    /// Lowercase name as used in object names and node settings
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Ingest => "ingest",
            NodeRole::Data => "data",
        }
    }
}

/// One node group of the search cluster
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchNode {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<NodeRole>,
    #[serde(default)]
    pub storage: Storage,
}

/// Lifecycle policy provisioned into the search cluster
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexPolicy {
    pub policy_name: String,
    pub index_pattern: String,
    /// Age after which indices are deleted, e.g. `7d`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_index_age: Option<String>,
    /// Age after which the write index rolls over, e.g. `1d`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollover_age: Option<String>,
}

/// Search cluster settings
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Elasticsearch {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub master_node: SearchNode,
    #[serde(default)]
    pub ingest_node: SearchNode,
    #[serde(default)]
    pub data_node: SearchNode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<IndexPolicy>,
}

impl Elasticsearch {
    /// Node groups in master, ingest, data order
    pub fn nodes(&self) -> [&SearchNode; 3] {
        [&self.master_node, &self.ingest_node, &self.data_node]
    }
}

/// Log viewer settings
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Kibana {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: i32,
}

/// Public API settings. Enabled unless explicitly turned off.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicApi {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: i32,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for PublicApi {
    fn default() -> Self {
        Self {
            enabled: true,
            replicas: 0,
        }
    }
}

/// Observed lifecycle state
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum InstanceState {
    Running,
    Error,
    Terminating,
}

/// Observed state of one monitoring stack
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// RFC 3339 time at which the operator first saw the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<InstanceState>,
    /// Content hash of the last reconciled spec
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = VerrazzanoMonitoringInstance::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("verrazzanomonitoringinstances.verrazzano.io")
        );
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }

    #[test]
    fn api_is_enabled_unless_turned_off() {
        let spec: InstanceSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.api.enabled);
        let spec: InstanceSpec =
            serde_json::from_value(serde_json::json!({ "api": { "enabled": false } })).unwrap();
        assert!(!spec.api.enabled);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let node: SearchNode = serde_json::from_value(serde_json::json!({
            "name": "es-data",
            "replicas": 3,
            "roles": ["data", "ingest"],
        }))
        .unwrap();
        assert_eq!(node.roles, vec![NodeRole::Data, NodeRole::Ingest]);
        assert_eq!(node.roles[0].as_str(), "data");
    }
}
