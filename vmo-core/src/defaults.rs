//! Filling in unset fields of an instance before it is reconciled
use crate::{
    config::OperatorConfig,
    crd::{InstanceState, NodeRole, SearchNode, Storage, VerrazzanoMonitoringInstance},
    names::{self, meta_name},
    sequence::ensure_claim_names,
    Result,
};
use chrono::{DateTime, SecondsFormat, Utc};

/// Retention of the metrics server in days when unset
pub const DEFAULT_RETENTION_DAYS: i32 = 90;

/// Artifact name suffixes
pub mod artifacts {
    pub const DASHBOARDS: &str = "dashboards";
    pub const DATASOURCES: &str = "datasources";
    pub const PROMETHEUS_CONFIG: &str = "prometheus-config";
    pub const PROMETHEUS_VERSIONS: &str = "prometheus-config-versions";
    pub const ALERT_RULES: &str = "alertrules";
    pub const ALERT_RULES_VERSIONS: &str = "alertrules-versions";
    pub const ALERTMANAGER_CONFIG: &str = "alertmanager-config";
    pub const ALERTMANAGER_VERSIONS: &str = "alertmanager-config-versions";
}

/// Initialize every unset element of `vmi`
///
/// This is idempotent: applying it to an already initialized instance changes nothing, so
/// the engine can compare the result against the observed object to decide whether a
/// write-back is needed.
pub fn initialize(
    vmi: &mut VerrazzanoMonitoringInstance,
    config: &OperatorConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    let instance = names::instance_name(vmi)?;
    let spec = &mut vmi.spec;

    spec.secret_name = format!("{instance}-basicauth");
    if spec.service_type.is_empty() {
        spec.service_type = "ClusterIP".into();
    }

    set_if_empty(&mut spec.grafana.dashboards_config_map, &instance, artifacts::DASHBOARDS);
    set_if_empty(&mut spec.grafana.datasources_config_map, &instance, artifacts::DATASOURCES);
    set_if_empty(&mut spec.prometheus.config_map, &instance, artifacts::PROMETHEUS_CONFIG);
    set_if_empty(&mut spec.prometheus.versions_config_map, &instance, artifacts::PROMETHEUS_VERSIONS);
    set_if_empty(&mut spec.prometheus.rules_config_map, &instance, artifacts::ALERT_RULES);
    set_if_empty(
        &mut spec.prometheus.rules_versions_config_map,
        &instance,
        artifacts::ALERT_RULES_VERSIONS,
    );
    set_if_empty(&mut spec.alertmanager.config_map, &instance, artifacts::ALERTMANAGER_CONFIG);
    set_if_empty(
        &mut spec.alertmanager.versions_config_map,
        &instance,
        artifacts::ALERTMANAGER_VERSIONS,
    );

    let default_replicas = config.default_simple_component_replicas;
    for replicas in [
        &mut spec.kibana.replicas,
        &mut spec.prometheus.replicas,
        &mut spec.alertmanager.replicas,
        &mut spec.api.replicas,
    ] {
        if *replicas == 0 {
            *replicas = default_replicas;
        }
    }

    init_node(&mut spec.elasticsearch.master_node, NodeRole::Master);
    init_node(&mut spec.elasticsearch.ingest_node, NodeRole::Ingest);
    init_node(&mut spec.elasticsearch.data_node, NodeRole::Data);

    init_storage(
        &mut spec.prometheus.storage,
        spec.prometheus.replicas,
        &meta_name(&instance, names::PROMETHEUS.name),
    );
    init_storage(
        &mut spec.grafana.storage,
        spec.grafana.replicas,
        &meta_name(&instance, names::GRAFANA.name),
    );
    let data_node = &mut spec.elasticsearch.data_node;
    let first = meta_name(&instance, &data_node.name);
    init_storage(&mut data_node.storage, data_node.replicas, &first);

    if spec.prometheus.retention_period == 0 {
        spec.prometheus.retention_period = DEFAULT_RETENTION_DAYS;
    }

    let status = vmi.status.get_or_insert_with(Default::default);
    if status.creation_time.is_none() {
        status.creation_time = Some(now.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if status.env_name.is_empty() {
        status.env_name = config.env_name.clone();
    }
    if status.state.is_none() {
        status.state = Some(InstanceState::Running);
    }
    Ok(())
}

fn set_if_empty(field: &mut String, instance: &str, suffix: &str) {
    if field.is_empty() {
        *field = meta_name(instance, suffix);
    }
}

fn init_node(node: &mut SearchNode, role: NodeRole) {
    if node.name.is_empty() {
        node.name = format!("es-{}", role.as_str());
    }
    if node.roles.is_empty() {
        node.roles = vec![role];
    }
}

fn init_storage(storage: &mut Storage, replicas: i32, first: &str) {
    if !storage.is_configured() {
        return;
    }
    let desired = usize::try_from(replicas).unwrap_or(0);
    storage.pvc_names = ensure_claim_names(&storage.pvc_names, desired, first);
}
