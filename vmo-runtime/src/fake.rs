//! In-memory API server backing a real [`kube::Client`] in tests
//!
//! Objects are held as json keyed by collection path and name. Creates, replaces,
//! status patches and deletes are recorded as `METHOD plural/name` so tests can count
//! writes, and any method on any collection can be made to fail.
use crate::{cache::Writers, search};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{client::Body, runtime::watcher::Event, Client, Resource};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use vmo_core::{InstanceSpec, VerrazzanoMonitoringInstance};

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Value>,
    writes: Vec<String>,
    failures: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct ApiServer {
    state: Arc<Mutex<State>>,
    version: Arc<AtomicU64>,
}

struct Target {
    collection: String,
    plural: String,
    name: Option<String>,
    status: bool,
}

fn target(path: &str) -> Option<Target> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let prefix = match segments.first()? {
        &"api" => 2,
        &"apis" => 3,
        _ => return None,
    };
    let base = if segments.get(prefix) == Some(&"namespaces") && segments.len() > prefix + 2 {
        prefix + 3
    } else {
        prefix + 1
    };
    if segments.len() < base {
        return None;
    }
    Some(Target {
        collection: format!("/{}", segments[..base].join("/")),
        plural: segments[base - 1].to_string(),
        name: segments.get(base).map(|s| s.to_string()),
        status: segments.get(base + 1) == Some(&"status"),
    })
}

fn respond(code: StatusCode, body: &Value) -> Response<Body> {
    Response::builder()
        .status(code)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn failure(code: StatusCode, reason: &str) -> Response<Body> {
    respond(
        code,
        &json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code.as_u16(),
        }),
    )
}

impl ApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client talking to this server
    pub fn client(&self) -> Client {
        let server = self.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let server = server.clone();
            async move { Ok::<_, Infallible>(server.handle(request).await) }
        });
        Client::new(service, "default")
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Store an object without recording a write
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, object: &K) {
        let ns = object.meta().namespace.clone();
        let collection = K::url_path(&(), ns.as_deref());
        let mut value = serde_json::to_value(object).unwrap();
        value["metadata"]["resourceVersion"] = json!(self.next_version());
        let name = object.meta().name.clone().unwrap();
        self.state.lock().objects.insert((collection, name), value);
    }

    /// Current copy of one object
    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = (K::url_path(&(), Some(namespace)), name.to_string());
        let value = self.state.lock().objects.get(&key).cloned()?;
        Some(serde_json::from_value(value).unwrap())
    }

    /// Every stored object of a kind in `namespace`
    pub fn list<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: &str) -> Vec<K> {
        let collection = K::url_path(&(), Some(namespace));
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// Make every `method` request against collections named `plural` fail with a 500
    pub fn fail(&self, method: &str, plural: &str) {
        self.state.lock().failures.push((method.into(), plural.into()));
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.state.lock().failures.clear();
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Relist every kind into the caches, as the reflectors would
    pub fn sync(&self, writers: &mut Writers, namespace: &str) {
        self.relist(&mut writers.instances, namespace);
        self.relist(&mut writers.config_maps, namespace);
        self.relist(&mut writers.services, namespace);
        self.relist(&mut writers.claims, namespace);
        self.relist(&mut writers.deployments, namespace);
        self.relist(&mut writers.stateful_sets, namespace);
        self.relist(&mut writers.ingresses, namespace);
        self.relist(&mut writers.role_bindings, namespace);
        self.relist(&mut writers.secrets, namespace);
    }

    fn relist<K>(&self, writer: &mut kube::runtime::reflector::store::Writer<K>, namespace: &str)
    where
        K: Resource<DynamicType = ()> + DeserializeOwned + Clone,
    {
        writer.apply_watcher_event(&Event::Init);
        for object in self.list::<K>(namespace) {
            writer.apply_watcher_event(&Event::InitApply(object));
        }
        writer.apply_watcher_event(&Event::InitDone);
    }

    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let Some(target) = target(parts.uri.path()) else {
            return failure(StatusCode::NOT_FOUND, "NotFound");
        };
        let method = parts.method.clone();
        if self
            .state
            .lock()
            .failures
            .iter()
            .any(|(m, p)| *m == method.as_str() && *p == target.plural)
        {
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
        }
        let bytes = body.collect().await.unwrap().to_bytes();
        let payload: Option<Value> = serde_json::from_slice(&bytes).ok();
        let mut state = self.state.lock();

        match (method, target.name) {
            (Method::GET, Some(name)) => match state.objects.get(&(target.collection, name)) {
                Some(object) => respond(StatusCode::OK, object),
                None => failure(StatusCode::NOT_FOUND, "NotFound"),
            },
            (Method::POST, None) => {
                let mut object = payload.unwrap_or_default();
                let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
                let key = (target.collection, name.clone());
                if state.objects.contains_key(&key) {
                    return failure(StatusCode::CONFLICT, "AlreadyExists");
                }
                object["metadata"]["resourceVersion"] = json!(self.next_version());
                object["metadata"]["uid"] = json!(format!("uid-{name}"));
                state.writes.push(format!("POST {}/{name}", target.plural));
                state.objects.insert(key, object.clone());
                respond(StatusCode::CREATED, &object)
            }
            (Method::PUT, Some(name)) => {
                let mut object = payload.unwrap_or_default();
                let key = (target.collection, name.clone());
                let Some(stored) = state.objects.get(&key) else {
                    return failure(StatusCode::NOT_FOUND, "NotFound");
                };
                if object["metadata"]["resourceVersion"] != stored["metadata"]["resourceVersion"] {
                    return failure(StatusCode::CONFLICT, "Conflict");
                }
                object["metadata"]["resourceVersion"] = json!(self.next_version());
                state.writes.push(format!("PUT {}/{name}", target.plural));
                state.objects.insert(key, object.clone());
                respond(StatusCode::OK, &object)
            }
            (Method::PATCH, Some(name)) => {
                let key = (target.collection, name.clone());
                let Some(stored) = state.objects.get_mut(&key) else {
                    return failure(StatusCode::NOT_FOUND, "NotFound");
                };
                json_patch::merge(stored, &payload.unwrap_or_default());
                stored["metadata"]["resourceVersion"] = json!(self.next_version());
                let object = stored.clone();
                let suffix = if target.status { "/status" } else { "" };
                state.writes.push(format!("PATCH {}/{name}{suffix}", target.plural));
                respond(StatusCode::OK, &object)
            }
            (Method::DELETE, Some(name)) => match state.objects.remove(&(target.collection, name.clone())) {
                Some(object) => {
                    state.writes.push(format!("DELETE {}/{name}", target.plural));
                    respond(StatusCode::OK, &object)
                }
                None => failure(StatusCode::NOT_FOUND, "NotFound"),
            },
            _ => failure(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
        }
    }
}

/// An instance with every component enabled, as a user would submit it
pub fn instance() -> VerrazzanoMonitoringInstance {
    let mut spec = InstanceSpec {
        uri: "monitoring.example.com".into(),
        secrets_name: "system-credentials".into(),
        ..InstanceSpec::default()
    };
    spec.prometheus.enabled = true;
    spec.prometheus.storage.size = "50Gi".into();
    spec.grafana.enabled = true;
    spec.grafana.replicas = 1;
    spec.alertmanager.enabled = true;
    spec.kibana.enabled = true;
    spec.elasticsearch.enabled = true;
    spec.elasticsearch.master_node.replicas = 3;
    spec.elasticsearch.ingest_node.replicas = 1;
    spec.elasticsearch.data_node.replicas = 2;
    spec.elasticsearch.data_node.storage.size = "100Gi".into();
    let mut vmi = VerrazzanoMonitoringInstance::new("system", spec);
    vmi.metadata.namespace = Some("monitoring".into());
    vmi.metadata.uid = Some("5b5f-uid".into());
    vmi
}

/// The credentials secret `instance()` refers to
pub fn credentials() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("system-credentials".into()),
            namespace: Some("monitoring".into()),
            ..ObjectMeta::default()
        },
        string_data: Some(BTreeMap::from([
            ("username".to_string(), "admin".to_string()),
            ("password".to_string(), "changeme".to_string()),
        ])),
        ..Secret::default()
    }
}

/// A green search cluster running every node `instance()` declares
pub fn green_cluster() -> search::fake::Cluster {
    search::fake::Cluster {
        status: "green".into(),
        nodes: [
            "vmi-system-es-master-0",
            "vmi-system-es-master-1",
            "vmi-system-es-master-2",
            "vmi-system-es-ingest-7d9f-abcde",
            "vmi-system-es-data-5c8d-qwert",
            "vmi-system-es-data-1-6f7a-zxcvb",
        ]
        .map(String::from)
        .to_vec(),
        ..search::fake::Cluster::default()
    }
}
