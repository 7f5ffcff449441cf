//! Config artifacts and the policy by which each is reconciled
use crate::{
    crd::VerrazzanoMonitoringInstance,
    names::{self, meta_name},
    OperatorConfig, Result,
};
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

/// Key of the scrape configuration document
pub const PROMETHEUS_CONFIG_KEY: &str = "prometheus.yml";
/// Key of the alert router configuration document
pub const ALERTMANAGER_CONFIG_KEY: &str = "alertmanager.yml";
/// Key of the dashboard provider document
pub const DASHBOARD_PROVIDER_KEY: &str = "vmo-dashboard-provider.yml";
/// Key of the datasources document
pub const DATASOURCES_KEY: &str = "datasource.yaml";
/// Directory the dashboard server loads dashboards from
pub const DASHBOARDS_PATH: &str = "/etc/grafana/provisioning/dashboardjson";
/// Directory the metrics server loads rule files from
pub const RULES_PATH: &str = "/etc/prometheus/rules";

/// How an artifact is brought in line with its rendered defaults
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactPolicy {
    /// Created when absent, never touched afterwards
    CreateOnce,
    /// Keys starting with `prefix` are replaced, all others are kept
    ReservedKeys {
        /// Prefix of operator-owned keys
        prefix: String,
    },
    /// The document under `key` is merged job by job
    ScrapeJobs {
        /// Key of the scrape configuration document
        key: &'static str,
    },
}

/// A rendered config artifact
#[derive(Clone, Debug)]
pub struct Artifact {
    /// The artifact as it should be created
    pub config_map: ConfigMap,
    /// How it is reconciled once it exists
    pub policy: ArtifactPolicy,
}

impl Artifact {
    /// Name of the artifact
    pub fn name(&self) -> &str {
        self.config_map.metadata.name.as_deref().unwrap_or_default()
    }

    /// Rendered data of the artifact
    pub fn data(&self) -> BTreeMap<String, String> {
        self.config_map.data.clone().unwrap_or_default()
    }
}

/// Every config artifact of an instance
///
/// Artifact names come from the defaulted spec. The alert router configuration is taken
/// from `spec.alertmanager.config` when set; it is only ever used to create the artifact.
pub fn config_maps(vmi: &VerrazzanoMonitoringInstance, config: &OperatorConfig) -> Result<Vec<Artifact>> {
    let spec = &vmi.spec;
    let instance = names::instance_name(vmi)?;
    let prometheus_url = format!(
        "http://{}:{}",
        meta_name(&instance, names::PROMETHEUS.name),
        names::PROMETHEUS.port
    );
    let alertmanager_host = format!(
        "{}:{}",
        meta_name(&instance, names::ALERTMANAGER.name),
        names::ALERTMANAGER.port
    );
    let alertmanager_config = if spec.alertmanager.config.is_empty() {
        default_alertmanager_config()
    } else {
        spec.alertmanager.config.clone()
    };
    let rule_key = format!("{}1-rule.yml", config.alert_rule_prefix);

    let artifacts = [
        (
            &spec.grafana.dashboards_config_map,
            names::GRAFANA.name,
            data([(DASHBOARD_PROVIDER_KEY, dashboard_provider())]),
            ArtifactPolicy::CreateOnce,
        ),
        (
            &spec.grafana.datasources_config_map,
            names::GRAFANA.name,
            data([(DATASOURCES_KEY, datasources(&prometheus_url, &alertmanager_host))]),
            ArtifactPolicy::CreateOnce,
        ),
        (
            &spec.alertmanager.config_map,
            names::ALERTMANAGER.name,
            data([(ALERTMANAGER_CONFIG_KEY, alertmanager_config)]),
            ArtifactPolicy::CreateOnce,
        ),
        (
            &spec.alertmanager.versions_config_map,
            names::ALERTMANAGER.name,
            BTreeMap::new(),
            ArtifactPolicy::CreateOnce,
        ),
        (
            &spec.prometheus.rules_config_map,
            names::PROMETHEUS.name,
            data([(rule_key.as_str(), default_alert_rules(&instance))]),
            ArtifactPolicy::ReservedKeys {
                prefix: config.alert_rule_prefix.clone(),
            },
        ),
        (
            &spec.prometheus.rules_versions_config_map,
            names::PROMETHEUS.name,
            BTreeMap::new(),
            ArtifactPolicy::CreateOnce,
        ),
        (
            &spec.prometheus.config_map,
            names::PROMETHEUS.name,
            data([(PROMETHEUS_CONFIG_KEY, prometheus_config(vmi, config, &alertmanager_host)?)]),
            ArtifactPolicy::ScrapeJobs {
                key: PROMETHEUS_CONFIG_KEY,
            },
        ),
        (
            &spec.prometheus.versions_config_map,
            names::PROMETHEUS.name,
            BTreeMap::new(),
            ArtifactPolicy::CreateOnce,
        ),
    ];

    artifacts
        .into_iter()
        .map(|(name, component, data, policy)| {
            Ok(Artifact {
                config_map: ConfigMap {
                    metadata: names::object_meta(vmi, name.clone(), component)?,
                    data: Some(data),
                    ..ConfigMap::default()
                },
                policy,
            })
        })
        .collect()
}

fn data<const N: usize, V: Into<String>>(pairs: [(&str, V); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect()
}

fn dashboard_provider() -> String {
    format!(
        r#"apiVersion: 1
providers:
  - name: default
    orgId: 1
    folder: ""
    type: file
    disableDeletion: false
    options:
      path: {DASHBOARDS_PATH}
"#
    )
}

fn datasources(prometheus_url: &str, alertmanager_host: &str) -> String {
    format!(
        r#"apiVersion: 1
datasources:
  - name: Prometheus
    type: prometheus
    access: proxy
    orgId: 1
    url: {prometheus_url}
    isDefault: true
    editable: true
  - name: Alertmanager
    type: alertmanager
    access: proxy
    orgId: 1
    url: http://{alertmanager_host}
    jsonData:
      implementation: prometheus
"#
    )
}

fn default_alertmanager_config() -> String {
    r#"route:
  receiver: default
  group_by: [alertname]
  group_wait: 10s
  group_interval: 5m
  repeat_interval: 3h
receivers:
  - name: default
"#
    .to_string()
}

fn default_alert_rules(instance: &str) -> String {
    format!(
        r#"groups:
  - name: vmi-{instance}-default
    rules:
      - alert: TargetDown
        expr: up == 0
        for: 5m
        labels:
          severity: warning
        annotations:
          summary: "{{{{ $labels.job }}}} target {{{{ $labels.instance }}}} is down"
"#
    )
}

fn prometheus_config(
    vmi: &VerrazzanoMonitoringInstance,
    config: &OperatorConfig,
    alertmanager_host: &str,
) -> Result<String> {
    let ns = names::namespace(vmi)?;
    let env = &config.env_name;
    let prometheus_port = names::PROMETHEUS.port;
    Ok(format!(
        r#"global:
  scrape_interval: 20s
  evaluation_interval: 30s
  external_labels:
    env: "{env}"
rule_files:
  - {RULES_PATH}/*.yml
alerting:
  alertmanagers:
    - static_configs:
        - targets: ["{alertmanager_host}"]
scrape_configs:
  - job_name: prometheus
    scrape_interval: 20s
    scrape_timeout: 15s
    static_configs:
      - targets: ["localhost:{prometheus_port}"]
  - job_name: alertmanager
    static_configs:
      - targets: ["{alertmanager_host}"]
  - job_name: kubernetes-pods
    kubernetes_sd_configs:
      - role: pod
        namespaces:
          names: ["{ns}"]
    relabel_configs:
      - source_labels: [__meta_kubernetes_pod_annotation_prometheus_io_scrape]
        action: keep
        regex: "true"
      - source_labels: [__meta_kubernetes_pod_name]
        target_label: pod
  - job_name: node-exporter
    kubernetes_sd_configs:
      - role: endpoints
    relabel_configs:
      - source_labels: [__meta_kubernetes_endpoints_name]
        action: keep
        regex: node-exporter
      - source_labels: [__meta_kubernetes_pod_node_name]
        target_label: node
"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builders::fixtures::full_instance, merge};

    fn artifact<'a>(artifacts: &'a [Artifact], name: &str) -> &'a Artifact {
        artifacts.iter().find(|a| a.name() == name).unwrap()
    }

    #[test]
    fn every_artifact_is_rendered_with_its_policy() {
        let artifacts = config_maps(&full_instance(), &OperatorConfig::default()).unwrap();
        assert_eq!(artifacts.len(), 8);
        assert_eq!(
            artifact(&artifacts, "vmi-system-prometheus-config").policy,
            ArtifactPolicy::ScrapeJobs {
                key: PROMETHEUS_CONFIG_KEY
            }
        );
        assert_eq!(
            artifact(&artifacts, "vmi-system-alertrules").policy,
            ArtifactPolicy::ReservedKeys { prefix: "vmo-".into() }
        );
        let versions = artifact(&artifacts, "vmi-system-alertrules-versions");
        assert_eq!(versions.policy, ArtifactPolicy::CreateOnce);
        assert!(versions.data().is_empty());
    }

    #[test]
    fn rule_file_uses_reserved_prefix() {
        let artifacts = config_maps(&full_instance(), &OperatorConfig::default()).unwrap();
        let rules = artifact(&artifacts, "vmi-system-alertrules").data();
        assert!(rules.contains_key("vmo-1-rule.yml"));
        assert!(rules["vmo-1-rule.yml"].contains("{{ $labels.job }}"));
    }

    #[test]
    fn datasources_point_at_instance_services() {
        let artifacts = config_maps(&full_instance(), &OperatorConfig::default()).unwrap();
        let ds = &artifact(&artifacts, "vmi-system-datasources").data()[DATASOURCES_KEY];
        assert!(ds.contains("url: http://vmi-system-prometheus:9090"));
        assert!(ds.contains("url: http://vmi-system-alertmanager:9093"));
    }

    #[test]
    fn alertmanager_config_prefers_spec() {
        let mut vmi = full_instance();
        vmi.spec.alertmanager.config = "route:\n  receiver: pager\n".into();
        let artifacts = config_maps(&vmi, &OperatorConfig::default()).unwrap();
        let am = &artifact(&artifacts, "vmi-system-alertmanager-config").data()[ALERTMANAGER_CONFIG_KEY];
        assert_eq!(am, "route:\n  receiver: pager\n");
    }

    #[test]
    fn rendered_scrape_config_is_stable_under_merge() {
        let artifacts = config_maps(&full_instance(), &OperatorConfig::default()).unwrap();
        let data = artifact(&artifacts, "vmi-system-prometheus-config").data();
        let doc = &data[PROMETHEUS_CONFIG_KEY];
        assert!(doc.contains(r#"names: ["monitoring"]"#));
        assert_eq!(merge::reconcile_scrape_config(PROMETHEUS_CONFIG_KEY, doc, doc).unwrap(), None);
    }

    #[test]
    fn artifacts_are_owned() {
        for artifact in config_maps(&full_instance(), &OperatorConfig::default()).unwrap() {
            let labels = artifact.config_map.metadata.labels.unwrap();
            assert!(names::is_owned_by(&labels, "system"));
        }
    }
}
