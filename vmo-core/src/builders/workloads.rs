//! Workloads
//!
//! Storage-backed components run one single-replica deployment per claim so that a replica
//! keeps its volume across restarts and scale-in removes exactly the tail of the sequence.
//! Components without storage run one deployment sized to their replica count. The search
//! cluster's master group runs as a stateful set for stable peer names.
use super::config_maps::{ALERTMANAGER_CONFIG_KEY, DASHBOARDS_PATH, PROMETHEUS_CONFIG_KEY, RULES_PATH};
use crate::{
    crd::{SearchNode, Storage, VerrazzanoMonitoringInstance},
    names::{self, meta_name, Component},
    Result,
};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec},
        core::v1::{
            ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
            ObjectFieldSelector, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
            SecretKeySelector, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use std::collections::BTreeMap;

/// Label distinguishing the pods of one workload from its siblings
pub const WORKLOAD_LABEL: &str = "verrazzano.io/workload";

/// Desired workloads of an instance
#[derive(Clone, Debug, Default)]
pub struct Workloads {
    /// Deployments, in component order
    pub deployments: Vec<Deployment>,
    /// Stateful sets of the search cluster masters
    pub stateful_sets: Vec<StatefulSet>,
}

/// Build the workloads of every enabled component
pub fn workloads(vmi: &VerrazzanoMonitoringInstance) -> Result<Workloads> {
    let spec = &vmi.spec;
    let instance = names::instance_name(vmi)?;
    let mut out = Workloads::default();

    if spec.prometheus.enabled {
        let p = &spec.prometheus;
        let container = container(names::PROMETHEUS)
            .args(vec![
                format!("--config.file=/etc/prometheus/config/{PROMETHEUS_CONFIG_KEY}"),
                "--storage.tsdb.path=/prometheus".into(),
                format!("--storage.tsdb.retention.time={}d", p.retention_period),
                "--web.enable-lifecycle".into(),
            ])
            .mount("config", "/etc/prometheus/config")
            .mount("rules", RULES_PATH)
            .mount("storage", "/prometheus");
        let volumes = vec![
            config_volume("config", &p.config_map),
            config_volume("rules", &p.rules_config_map),
        ];
        out.deployments
            .extend(per_claim(vmi, names::PROMETHEUS, p.replicas, &p.storage, container, volumes)?);
    }

    if spec.grafana.enabled {
        let g = &spec.grafana;
        let container = container(names::GRAFANA)
            .env(credentials(vmi, "GF_SECURITY_ADMIN_USER", "GF_SECURITY_ADMIN_PASSWORD"))
            .mount("dashboards", "/etc/grafana/provisioning/dashboards")
            .mount("datasources", "/etc/grafana/provisioning/datasources")
            .mount("storage", "/var/lib/grafana");
        let volumes = vec![
            config_volume("dashboards", &g.dashboards_config_map),
            config_volume("datasources", &g.datasources_config_map),
        ];
        let mut deployments = per_claim(vmi, names::GRAFANA, g.replicas, &g.storage, container, volumes)?;
        for deployment in &mut deployments {
            set_env(deployment, "GF_PATHS_PROVISIONING_DASHBOARDS", DASHBOARDS_PATH)?;
        }
        out.deployments.extend(deployments);
    }

    if spec.alertmanager.enabled {
        let a = &spec.alertmanager;
        let peer = format!(
            "{}:{}",
            meta_name(&instance, names::ALERTMANAGER_CLUSTER.name),
            names::ALERTMANAGER_CLUSTER.port
        );
        let container = container(names::ALERTMANAGER)
            .args(vec![
                format!("--config.file=/etc/alertmanager/config/{ALERTMANAGER_CONFIG_KEY}"),
                format!("--cluster.listen-address=0.0.0.0:{}", names::ALERTMANAGER_CLUSTER.port),
                format!("--cluster.peer={peer}"),
            ])
            .mount("config", "/etc/alertmanager/config");
        out.deployments.push(deployment(
            vmi,
            names::ALERTMANAGER,
            meta_name(&instance, names::ALERTMANAGER.name),
            a.replicas,
            container.into_pod(vec![config_volume("config", &a.config_map)]),
        )?);
    }

    if spec.kibana.enabled {
        let container = container(names::KIBANA).env(vec![plain_env(
            "OPENSEARCH_HOSTS",
            format!(
                "http://{}:{}",
                meta_name(&instance, names::SEARCH_INGEST.name),
                names::SEARCH_HTTP_PORT
            ),
        )]);
        out.deployments.push(deployment(
            vmi,
            names::KIBANA,
            meta_name(&instance, names::KIBANA.name),
            spec.kibana.replicas,
            container.into_pod(vec![]),
        )?);
    }

    if spec.api.enabled {
        let container = container(names::API)
            .env(credentials(vmi, "VMI_USERNAME", "VMI_PASSWORD"))
            .env(vec![plain_env("VMI_NAME", instance.clone())]);
        out.deployments.push(deployment(
            vmi,
            names::API,
            meta_name(&instance, names::API.name),
            spec.api.replicas,
            container.into_pod(vec![]),
        )?);
    }

    if spec.elasticsearch.enabled {
        let es = &spec.elasticsearch;
        out.stateful_sets.push(search_masters(vmi, &es.master_node)?);
        let ingest = search_container(vmi, names::SEARCH_INGEST, &es.ingest_node)?;
        out.deployments.push(deployment(
            vmi,
            names::SEARCH_INGEST,
            meta_name(&instance, names::SEARCH_INGEST.name),
            es.ingest_node.replicas,
            ingest.mount("storage", "/usr/share/opensearch/data").into_pod(vec![empty_dir("storage")]),
        )?);
        let data = search_container(vmi, names::SEARCH_DATA, &es.data_node)?
            .mount("storage", "/usr/share/opensearch/data");
        out.deployments.extend(per_claim(
            vmi,
            names::SEARCH_DATA,
            es.data_node.replicas,
            &es.data_node.storage,
            data,
            vec![],
        )?);
    }

    Ok(out)
}

/// One deployment per claim when storage is configured, else one sized deployment
///
/// `container` must mount a volume named `storage`, which is bound to the claim or to an
/// empty directory.
fn per_claim(
    vmi: &VerrazzanoMonitoringInstance,
    component: Component,
    replicas: i32,
    storage: &Storage,
    container: ContainerBuilder,
    volumes: Vec<Volume>,
) -> Result<Vec<Deployment>> {
    let instance = names::instance_name(vmi)?;
    let base = meta_name(&instance, component.name);
    if !storage.is_configured() {
        let mut volumes = volumes;
        volumes.push(empty_dir("storage"));
        return Ok(vec![deployment(
            vmi,
            component,
            base,
            replicas,
            container.into_pod(volumes),
        )?]);
    }

    storage
        .pvc_names
        .iter()
        .enumerate()
        .map(|(ordinal, claim)| {
            let name = if ordinal == 0 {
                base.clone()
            } else {
                format!("{base}-{ordinal}")
            };
            let mut volumes = volumes.clone();
            volumes.push(claim_volume("storage", claim));
            deployment(vmi, component, name, 1, container.clone().into_pod(volumes))
        })
        .collect()
}

fn search_masters(vmi: &VerrazzanoMonitoringInstance, node: &SearchNode) -> Result<StatefulSet> {
    let instance = names::instance_name(vmi)?;
    let name = meta_name(&instance, names::SEARCH_MASTER.name);
    let pod = search_container(vmi, names::SEARCH_MASTER, node)?
        .mount("storage", "/usr/share/opensearch/data")
        .into_pod(vec![empty_dir("storage")]);
    let labels = pod_labels(&instance, names::SEARCH_MASTER.name, &name);
    let mut sts = StatefulSet {
        metadata: names::object_meta(vmi, name.clone(), names::SEARCH_MASTER.name)?,
        spec: Some(StatefulSetSpec {
            replicas: Some(node.replicas),
            service_name: Some(name),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: template(labels, pod),
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    };
    names::stamp_desired_hash(&mut sts.metadata, &sts.spec)?;
    Ok(sts)
}

fn search_container(
    vmi: &VerrazzanoMonitoringInstance,
    component: Component,
    node: &SearchNode,
) -> Result<ContainerBuilder> {
    let instance = names::instance_name(vmi)?;
    let masters = meta_name(&instance, names::SEARCH_MASTER.name);
    let initial_masters = (0..node_replicas(&vmi.spec.elasticsearch.master_node))
        .map(|i| format!("{masters}-{i}"))
        .collect::<Vec<_>>()
        .join(",");
    let roles = node
        .roles
        .iter()
        .map(|r| match r.as_str() {
            "master" => "cluster_manager",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(",");
    Ok(container(component)
        .port(names::SEARCH_HTTP_PORT)
        .env(vec![
            plain_env("cluster.name", instance.clone()),
            field_env("node.name", "metadata.name"),
            plain_env("node.roles", roles),
            plain_env("discovery.seed_hosts", masters),
            plain_env("cluster.initial_cluster_manager_nodes", initial_masters),
            plain_env("OPENSEARCH_JAVA_OPTS", "-Xms1g -Xmx1g"),
        ]))
}

fn node_replicas(node: &SearchNode) -> i32 {
    node.replicas.max(0)
}

fn deployment(
    vmi: &VerrazzanoMonitoringInstance,
    component: Component,
    name: String,
    replicas: i32,
    pod: PodSpec,
) -> Result<Deployment> {
    let instance = names::instance_name(vmi)?;
    let labels = pod_labels(&instance, component.name, &name);
    let mut deployment = Deployment {
        metadata: names::object_meta(vmi, name, component.name)?,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: template(labels, pod),
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    };
    names::stamp_desired_hash(&mut deployment.metadata, &deployment.spec)?;
    Ok(deployment)
}

fn pod_labels(instance: &str, component: &str, workload: &str) -> BTreeMap<String, String> {
    let mut labels = names::selector(instance, component);
    labels.insert(WORKLOAD_LABEL.to_string(), workload.to_string());
    labels
}

fn template(labels: BTreeMap<String, String>, pod: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..ObjectMeta::default()
        }),
        spec: Some(pod),
    }
}

fn set_env(deployment: &mut Deployment, name: &str, value: &str) -> Result<()> {
    let containers = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .map(|p| p.containers.iter_mut());
    for c in containers.into_iter().flatten() {
        c.env.get_or_insert_with(Vec::new).push(plain_env(name, value));
    }
    names::stamp_desired_hash(&mut deployment.metadata, &deployment.spec)
}

/// Credentials of the stack, read from the secret named by `spec.secretsName`
fn credentials(vmi: &VerrazzanoMonitoringInstance, user_var: &str, password_var: &str) -> Vec<EnvVar> {
    let secret = &vmi.spec.secrets_name;
    if secret.is_empty() {
        return vec![];
    }
    [(user_var, "username"), (password_var, "password")]
        .into_iter()
        .map(|(var, key)| EnvVar {
            name: var.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.clone(),
                    key: key.to_string(),
                    ..SecretKeySelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        })
        .collect()
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn config_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            ..PersistentVolumeClaimVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Volume::default()
    }
}

fn container(component: Component) -> ContainerBuilder {
    ContainerBuilder(Container {
        name: component.name.to_string(),
        image: Some(component.image.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: component.port,
            ..ContainerPort::default()
        }]),
        ..Container::default()
    })
}

#[derive(Clone)]
struct ContainerBuilder(Container);

impl ContainerBuilder {
    fn args(mut self, args: Vec<String>) -> Self {
        self.0.args = Some(args);
        self
    }

    fn env(mut self, env: Vec<EnvVar>) -> Self {
        self.0.env.get_or_insert_with(Vec::new).extend(env);
        self
    }

    fn port(mut self, port: i32) -> Self {
        let ports = self.0.ports.get_or_insert_with(Vec::new);
        if !ports.iter().any(|p| p.container_port == port) {
            ports.push(ContainerPort {
                container_port: port,
                ..ContainerPort::default()
            });
        }
        self
    }

    fn mount(mut self, volume: &str, path: &str) -> Self {
        self.0.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            ..VolumeMount::default()
        });
        self
    }

    fn into_pod(self, volumes: Vec<Volume>) -> PodSpec {
        PodSpec {
            containers: vec![self.0],
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..PodSpec::default()
        }
    }
}
