//! Network endpoints
use crate::{
    crd::VerrazzanoMonitoringInstance,
    names::{self, meta_name, Component},
    Result,
};
use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};

/// Every service the instance should have, one per enabled component
///
/// The alert router additionally gets a headless peer-discovery service, and the public
/// API is present unless explicitly disabled.
pub fn services(vmi: &VerrazzanoMonitoringInstance) -> Result<Vec<Service>> {
    let spec = &vmi.spec;
    let mut out = Vec::new();
    if spec.grafana.enabled {
        out.push(service(vmi, names::GRAFANA)?);
    }
    if spec.prometheus.enabled {
        out.push(service(vmi, names::PROMETHEUS)?);
    }
    if spec.alertmanager.enabled {
        out.push(service(vmi, names::ALERTMANAGER)?);
        let mut cluster = service(vmi, names::ALERTMANAGER_CLUSTER)?;
        if let Some(svc) = cluster.spec.as_mut() {
            svc.selector = Some(names::selector(&names::instance_name(vmi)?, names::ALERTMANAGER.name));
            svc.type_ = Some("ClusterIP".into());
            svc.cluster_ip = Some("None".into());
        }
        out.push(restamp(cluster)?);
    }
    if spec.elasticsearch.enabled {
        for component in [names::SEARCH_MASTER, names::SEARCH_INGEST, names::SEARCH_DATA] {
            out.push(service(vmi, component)?);
        }
    }
    if spec.kibana.enabled {
        out.push(service(vmi, names::KIBANA)?);
    }
    if spec.api.enabled {
        out.push(service(vmi, names::API)?);
    }
    Ok(out)
}

fn service(vmi: &VerrazzanoMonitoringInstance, component: Component) -> Result<Service> {
    let instance = names::instance_name(vmi)?;
    let svc = Service {
        metadata: names::object_meta(vmi, meta_name(&instance, component.name), component.name)?,
        spec: Some(ServiceSpec {
            type_: Some(vmi.spec.service_type.clone()),
            selector: Some(names::selector(&instance, component.name)),
            ports: Some(vec![ServicePort {
                name: Some(format!("http-{}", component.name)),
                port: component.port,
                target_port: Some(IntOrString::Int(component.port)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    };
    restamp(svc)
}

fn restamp(mut svc: Service) -> Result<Service> {
    names::stamp_desired_hash(&mut svc.metadata, &svc.spec)?;
    Ok(svc)
}
