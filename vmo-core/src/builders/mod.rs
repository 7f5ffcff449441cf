//! Desired-state constructors for every object kind an instance owns
//!
//! Builders are pure: they read a defaulted instance (see [`crate::defaults`]) and return
//! the objects that should exist for it. Objects that the runtime updates in place carry
//! a [`DESIRED_HASH_ANNOTATION`](crate::names::DESIRED_HASH_ANNOTATION) of their spec.
pub mod claims;
pub use claims::claims;

pub mod config_maps;
pub use config_maps::{config_maps, Artifact, ArtifactPolicy};

pub mod ingresses;
pub use ingresses::ingresses;

pub mod role_bindings;
pub use role_bindings::role_bindings;

pub mod services;
pub use services::services;

pub mod workloads;
pub use workloads::{workloads, Workloads};

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::{
        crd::{InstanceSpec, VerrazzanoMonitoringInstance},
        defaults, OperatorConfig,
    };
    use chrono::{TimeZone, Utc};
    use kube::Resource;

    /// A defaulted instance with every component enabled
    pub fn full_instance() -> VerrazzanoMonitoringInstance {
        let mut spec = InstanceSpec {
            uri: "monitoring.example.com".into(),
            secrets_name: "system-credentials".into(),
            ..InstanceSpec::default()
        };
        spec.prometheus.enabled = true;
        spec.prometheus.storage.size = "50Gi".into();
        spec.grafana.enabled = true;
        spec.grafana.replicas = 1;
        spec.grafana.storage.size = "10Gi".into();
        spec.alertmanager.enabled = true;
        spec.kibana.enabled = true;
        spec.elasticsearch.enabled = true;
        spec.elasticsearch.master_node.replicas = 3;
        spec.elasticsearch.ingest_node.replicas = 1;
        spec.elasticsearch.data_node.replicas = 2;
        spec.elasticsearch.data_node.storage.size = "100Gi".into();

        let mut vmi = VerrazzanoMonitoringInstance::new("system", spec);
        vmi.meta_mut().namespace = Some("monitoring".into());
        vmi.meta_mut().uid = Some("5b5f-uid".into());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        defaults::initialize(&mut vmi, &OperatorConfig::default(), now).unwrap();
        vmi
    }

    /// A defaulted instance with nothing but the public API
    pub fn minimal_instance() -> VerrazzanoMonitoringInstance {
        let mut vmi = VerrazzanoMonitoringInstance::new("bare", InstanceSpec::default());
        vmi.meta_mut().namespace = Some("monitoring".into());
        vmi.meta_mut().uid = Some("77aa-uid".into());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        defaults::initialize(&mut vmi, &OperatorConfig::default(), now).unwrap();
        vmi
    }
}
