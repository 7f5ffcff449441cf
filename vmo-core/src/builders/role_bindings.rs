//! Role bindings granting the stack read access it needs for service discovery
use crate::{crd::VerrazzanoMonitoringInstance, names, Result};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};

/// Cluster role the metrics server's service account is bound to
pub const DISCOVERY_CLUSTER_ROLE: &str = "vmi-cluster-role-default";

/// The single binding of the instance's service account to the discovery role
///
/// Only needed when the metrics server runs, since it is the only component that
/// discovers scrape targets.
pub fn role_bindings(vmi: &VerrazzanoMonitoringInstance) -> Result<Vec<RoleBinding>> {
    if !vmi.spec.prometheus.enabled {
        return Ok(vec![]);
    }
    let instance = names::instance_name(vmi)?;
    let ns = names::namespace(vmi)?;
    let mut binding = RoleBinding {
        metadata: names::object_meta(
            vmi,
            names::meta_name(&instance, "cluster-role-binding"),
            names::PROMETHEUS.name,
        )?,
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".into(),
            kind: "ClusterRole".into(),
            name: DISCOVERY_CLUSTER_ROLE.into(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".into(),
            name: "default".into(),
            namespace: Some(ns),
            ..Subject::default()
        }]),
    };
    let hash = names::content_hash(&(&binding.role_ref, &binding.subjects))?;
    binding
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(names::DESIRED_HASH_ANNOTATION.to_string(), hash);
    Ok(vec![binding])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures::{full_instance, minimal_instance};

    #[test]
    fn binds_default_service_account() {
        let bindings = role_bindings(&full_instance()).unwrap();
        assert_eq!(bindings.len(), 1);
        let b = &bindings[0];
        assert_eq!(b.metadata.name.as_deref(), Some("vmi-system-cluster-role-binding"));
        assert_eq!(b.role_ref.name, DISCOVERY_CLUSTER_ROLE);
        let subject = &b.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.namespace.as_deref(), Some("monitoring"));
        assert!(names::desired_hash(&b.metadata).is_some());
    }

    #[test]
    fn no_binding_without_metrics_server() {
        assert!(role_bindings(&minimal_instance()).unwrap().is_empty());
    }
}
