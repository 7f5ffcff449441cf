//! Ingress routes behind basic authentication
use crate::{
    crd::VerrazzanoMonitoringInstance,
    names::{self, meta_name, Component},
    Result,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, IngressTLS, ServiceBackendPort,
};
use std::collections::BTreeMap;

/// Routes for every enabled, user-facing component
///
/// Nothing is routed unless `spec.uri` is set. Each component is served on its own host
/// under the base domain, e.g. `grafana.<uri>`.
pub fn ingresses(vmi: &VerrazzanoMonitoringInstance) -> Result<Vec<Ingress>> {
    let spec = &vmi.spec;
    if spec.uri.is_empty() {
        return Ok(vec![]);
    }
    let routed = [
        (spec.grafana.enabled, names::GRAFANA, "grafana"),
        (spec.prometheus.enabled, names::PROMETHEUS, "prometheus"),
        (spec.alertmanager.enabled, names::ALERTMANAGER, "alertmanager"),
        (spec.kibana.enabled, names::KIBANA, "kibana"),
        (spec.elasticsearch.enabled, names::SEARCH_INGEST, "elasticsearch"),
        (spec.api.enabled, names::API, "api"),
    ];
    routed
        .into_iter()
        .filter(|(enabled, ..)| *enabled)
        .map(|(_, component, host)| ingress(vmi, component, &format!("{host}.{}", spec.uri)))
        .collect()
}

fn ingress(vmi: &VerrazzanoMonitoringInstance, component: Component, host: &str) -> Result<Ingress> {
    let instance = names::instance_name(vmi)?;
    let service = meta_name(&instance, component.name);
    let mut metadata = names::object_meta(vmi, service.clone(), component.name)?;
    metadata.annotations = Some(BTreeMap::from([
        ("nginx.ingress.kubernetes.io/auth-type".to_string(), "basic".to_string()),
        (
            "nginx.ingress.kubernetes.io/auth-secret".to_string(),
            vmi.spec.secret_name.clone(),
        ),
        (
            "nginx.ingress.kubernetes.io/auth-realm".to_string(),
            format!("{host} auth"),
        ),
        ("nginx.ingress.kubernetes.io/proxy-body-size".to_string(), "6M".to_string()),
    ]));
    let mut ingress = Ingress {
        metadata,
        spec: Some(IngressSpec {
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![host.to_string()]),
                secret_name: Some(format!("{instance}-tls")),
            }]),
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".into()),
                        path_type: "ImplementationSpecific".into(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service,
                                port: Some(ServiceBackendPort {
                                    number: Some(component.port),
                                    ..ServiceBackendPort::default()
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
            }]),
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    };
    names::stamp_desired_hash(&mut ingress.metadata, &ingress.spec)?;
    Ok(ingress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures::{full_instance, minimal_instance};

    #[test]
    fn no_routes_without_uri() {
        let mut vmi = full_instance();
        vmi.spec.uri.clear();
        assert!(ingresses(&vmi).unwrap().is_empty());
    }

    #[test]
    fn routes_are_basic_auth_protected() {
        let routes = ingresses(&full_instance()).unwrap();
        assert_eq!(routes.len(), 6);
        let grafana = &routes[0];
        let annotations = grafana.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations["nginx.ingress.kubernetes.io/auth-type"], "basic");
        assert_eq!(annotations["nginx.ingress.kubernetes.io/auth-secret"], "system-basicauth");
        assert!(names::desired_hash(&grafana.metadata).is_some());

        let rule = &grafana.spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("grafana.monitoring.example.com"));
        let backend = rule.http.as_ref().unwrap().paths[0].backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "vmi-system-grafana");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(3000));
    }

    #[test]
    fn search_route_targets_ingest_nodes() {
        let routes = ingresses(&full_instance()).unwrap();
        let search = routes
            .iter()
            .find(|r| r.metadata.name.as_deref() == Some("vmi-system-es-ingest"))
            .unwrap();
        let rule = &search.spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("elasticsearch.monitoring.example.com"));
    }

    #[test]
    fn only_api_for_minimal_instance() {
        let mut vmi = minimal_instance();
        vmi.spec.uri = "example.com".into();
        let routes = ingresses(&vmi).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].metadata.name.as_deref(), Some("vmi-bare-api"));
    }
}
