//! Storage claims
use crate::{
    crd::{Storage, VerrazzanoMonitoringInstance},
    names, OperatorConfig, Result,
};
use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};
use std::collections::BTreeMap;

/// One claim per name in the claim sequence of every enabled, storage-backed component
///
/// Claims are immutable once bound, so they carry no desired hash: the runtime only
/// creates missing claims and deletes ones that fell out of a sequence.
pub fn claims(
    vmi: &VerrazzanoMonitoringInstance,
    config: &OperatorConfig,
) -> Result<Vec<PersistentVolumeClaim>> {
    let spec = &vmi.spec;
    let storage_class = spec
        .storage_class
        .clone()
        .or_else(|| config.default_storage_class.clone());

    let mut groups: Vec<(&Storage, &str)> = Vec::new();
    if spec.prometheus.enabled {
        groups.push((&spec.prometheus.storage, names::PROMETHEUS.name));
    }
    if spec.grafana.enabled {
        groups.push((&spec.grafana.storage, names::GRAFANA.name));
    }
    if spec.elasticsearch.enabled {
        groups.push((&spec.elasticsearch.data_node.storage, names::SEARCH_DATA.name));
    }

    let mut out = Vec::new();
    for (storage, component) in groups {
        if !storage.is_configured() {
            continue;
        }
        for name in &storage.pvc_names {
            out.push(PersistentVolumeClaim {
                metadata: names::object_meta(vmi, name.clone(), component)?,
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".into()]),
                    storage_class_name: storage_class.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(storage.size.clone()),
                        )])),
                        ..VolumeResourceRequirements::default()
                    }),
                    ..PersistentVolumeClaimSpec::default()
                }),
                ..PersistentVolumeClaim::default()
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures::{full_instance, minimal_instance};

    #[test]
    fn claims_follow_sequences() {
        let claims = claims(&full_instance(), &OperatorConfig::default()).unwrap();
        let names: Vec<_> = claims.iter().filter_map(|c| c.metadata.name.as_deref()).collect();
        assert_eq!(names, vec![
            "vmi-system-prometheus",
            "vmi-system-grafana",
            "vmi-system-es-data",
            "vmi-system-es-data-1",
        ]);
        let spec = claims[2].spec.as_ref().unwrap();
        let requests = spec.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["storage"], Quantity("100Gi".into()));
    }

    #[test]
    fn storage_class_falls_back_to_operator_default() {
        let config = OperatorConfig {
            default_storage_class: Some("oci-bv".into()),
            ..OperatorConfig::default()
        };
        let mut vmi = full_instance();
        let claims_default = claims(&vmi, &config).unwrap();
        assert_eq!(
            claims_default[0].spec.as_ref().unwrap().storage_class_name.as_deref(),
            Some("oci-bv")
        );
        vmi.spec.storage_class = Some("fast".into());
        let claims_own = claims(&vmi, &config).unwrap();
        assert_eq!(
            claims_own[0].spec.as_ref().unwrap().storage_class_name.as_deref(),
            Some("fast")
        );
    }

    #[test]
    fn disabled_components_get_no_claims() {
        let mut vmi = full_instance();
        vmi.spec.elasticsearch.enabled = false;
        vmi.spec.grafana.enabled = false;
        let claims = claims(&vmi, &OperatorConfig::default()).unwrap();
        assert_eq!(claims.len(), 1);
        assert!(super::claims(&minimal_instance(), &OperatorConfig::default())
            .unwrap()
            .is_empty());
    }
}
