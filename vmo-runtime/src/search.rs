//! Health gating against the search cluster and provisioning of its lifecycle policies
use crate::{Error, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::BTreeSet, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};
use vmo_core::{
    crd::{IndexPolicy, SearchNode},
    names::{self, meta_name},
    VerrazzanoMonitoringInstance,
};

/// Description prefix marking a lifecycle policy as operator-managed
pub const MANAGED_POLICY_PREFIX: &str = "Managed by the Verrazzano Monitoring Operator";
const POLICIES_PATH: &str = "/_plugins/_ism/policies";
const DEFAULT_ROLLOVER_AGE: &str = "1d";
const DEFAULT_MIN_INDEX_AGE: &str = "7d";

/// Health summary reported by `/_cluster/health`
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ClusterHealth {
    /// `green`, `yellow` or `red`
    pub status: String,
    /// Nodes in the cluster
    #[serde(default)]
    pub number_of_nodes: i64,
    /// Nodes holding data
    #[serde(default)]
    pub number_of_data_nodes: i64,
}

impl ClusterHealth {
    /// Whether every shard is allocated
    pub fn is_green(&self) -> bool {
        self.status == "green"
    }
}

#[derive(Deserialize)]
struct CatNode {
    name: String,
}

#[derive(Deserialize)]
struct StoredPolicy {
    #[serde(rename = "_seq_no")]
    seq_no: i64,
    #[serde(rename = "_primary_term")]
    primary_term: i64,
    policy: Value,
}

#[derive(Deserialize)]
struct PolicyList {
    #[serde(default)]
    policies: Vec<ListedPolicy>,
}

#[derive(Deserialize)]
struct ListedPolicy {
    #[serde(rename = "_id")]
    id: String,
    policy: Value,
}

/// HTTP client for the search cluster of an instance
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    timeout: Duration,
    base_url: Option<String>,
}

impl SearchClient {
    /// A client whose requests time out after `timeout`
    ///
    /// The cluster endpoint is derived from each instance's ingest service.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            timeout,
            base_url: None,
        })
    }

    /// The same client with another request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send every request to `base_url` regardless of the instance
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn url(&self, vmi: &VerrazzanoMonitoringInstance, path: &str) -> Result<String> {
        let base = match &self.base_url {
            Some(base) => base.clone(),
            None => names::search_http_endpoint(vmi)?,
        };
        Ok(format!("{base}{path}"))
    }

    async fn send(
        &self,
        vmi: &VerrazzanoMonitoringInstance,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.request(method, self.url(vmi, path)?).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        vmi: &VerrazzanoMonitoringInstance,
        path: &str,
    ) -> Result<T> {
        let response = self.send(vmi, Method::GET, path, None).await?;
        let response = expect_success(response, path)?;
        Ok(response.json().await?)
    }

    /// Current cluster health
    pub async fn health(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<ClusterHealth> {
        self.get_json(vmi, "/_cluster/health").await
    }

    /// Names of every node in the cluster
    pub async fn node_names(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<Vec<String>> {
        let nodes: Vec<CatNode> = self.get_json(vmi, "/_cat/nodes?format=json&h=name").await?;
        Ok(nodes.into_iter().map(|n| n.name).collect())
    }

    /// Fail unless the cluster is green
    pub async fn check_green(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<()> {
        let health = self.health(vmi).await?;
        if !health.is_green() {
            return Err(Error::ClusterNotGreen(health.status));
        }
        Ok(())
    }

    /// Fail unless the cluster is green and every declared node is present
    #[instrument(skip_all)]
    pub async fn check_updated(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<()> {
        self.check_green(vmi).await?;
        let nodes = self.node_names(vmi).await?;
        let instance = names::instance_name(vmi)?;
        check_topology(&instance, &vmi.spec.elasticsearch.nodes(), &nodes)
    }

    /// Fail unless the data nodes may be resized
    ///
    /// The declared data node count is checked against `minimum` first, without any
    /// request. Then the cluster must be green and match the declared topology.
    #[instrument(skip_all)]
    pub async fn check_resizable(&self, vmi: &VerrazzanoMonitoringInstance, minimum: i32) -> Result<()> {
        let requested = vmi.spec.elasticsearch.data_node.replicas;
        if requested < minimum {
            return Err(Error::ResizeBelowMinimum { requested, minimum });
        }
        self.check_updated(vmi).await
    }

    /// Provision the declared lifecycle policies in the background
    ///
    /// The returned receiver yields exactly one value: the first error, or `Ok(())` once
    /// every policy is in place and undeclared managed policies are removed.
    pub fn configure_policies(&self, vmi: &VerrazzanoMonitoringInstance) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let client = self.clone();
        let vmi = vmi.clone();
        tokio::spawn(async move {
            let result = client.provision_policies(&vmi).await;
            // the receiver may have been dropped by a caller that does not care
            let _ = tx.send(result);
        });
        rx
    }

    async fn provision_policies(&self, vmi: &VerrazzanoMonitoringInstance) -> Result<()> {
        if !vmi.spec.elasticsearch.enabled {
            return Ok(());
        }
        let declared = &vmi.spec.elasticsearch.policies;
        for policy in declared {
            self.put_policy(vmi, policy).await?;
        }
        let keep: BTreeSet<&str> = declared.iter().map(|p| p.policy_name.as_str()).collect();
        let list: PolicyList = self.get_json(vmi, POLICIES_PATH).await?;
        for listed in list.policies {
            if keep.contains(listed.id.as_str()) || !is_managed(&listed.policy) {
                continue;
            }
            let path = format!("{POLICIES_PATH}/{}", listed.id);
            expect_success(self.send(vmi, Method::DELETE, &path, None).await?, &path)?;
            info!(policy = %listed.id, "removed undeclared lifecycle policy");
        }
        Ok(())
    }

    async fn put_policy(&self, vmi: &VerrazzanoMonitoringInstance, policy: &IndexPolicy) -> Result<()> {
        let body = policy_body(policy)?;
        let path = format!("{POLICIES_PATH}/{}", policy.policy_name);
        let response = self.send(vmi, Method::GET, &path, None).await?;
        let target = if response.status() == StatusCode::NOT_FOUND {
            path.clone()
        } else {
            let stored: StoredPolicy = expect_success(response, &path)?.json().await?;
            if description(&stored.policy) == description(&body["policy"]) {
                debug!(policy = %policy.policy_name, "lifecycle policy up to date");
                return Ok(());
            }
            format!(
                "{path}?if_seq_no={}&if_primary_term={}",
                stored.seq_no, stored.primary_term
            )
        };
        expect_success(self.send(vmi, Method::PUT, &target, Some(&body)).await?, &path)?;
        info!(policy = %policy.policy_name, "lifecycle policy written");
        Ok(())
    }
}

fn expect_success(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::SearchStatus {
            path: path.to_string(),
            status: status.as_u16(),
        })
    }
}

fn description(policy: &Value) -> Option<&str> {
    policy.get("description").and_then(Value::as_str)
}

fn is_managed(policy: &Value) -> bool {
    description(policy).is_some_and(|d| d.starts_with(MANAGED_POLICY_PREFIX))
}

/// Rollover-then-delete policy for one index pattern
///
/// The description carries a hash of the declaration so that a changed declaration is
/// detected without comparing the cluster's normalized copy field by field.
fn policy_body(policy: &IndexPolicy) -> Result<Value> {
    let rollover = policy.rollover_age.as_deref().unwrap_or(DEFAULT_ROLLOVER_AGE);
    let min_age = policy.min_index_age.as_deref().unwrap_or(DEFAULT_MIN_INDEX_AGE);
    let hash = names::content_hash(policy)?;
    Ok(json!({
        "policy": {
            "description": format!("{MANAGED_POLICY_PREFIX} ({hash})"),
            "default_state": "ingest",
            "states": [
                {
                    "name": "ingest",
                    "actions": [{ "rollover": { "min_index_age": rollover } }],
                    "transitions": [{ "state_name": "delete", "conditions": { "min_index_age": min_age } }]
                },
                {
                    "name": "delete",
                    "actions": [{ "delete": {} }],
                    "transitions": []
                }
            ],
            "ism_template": [{ "index_patterns": [policy.index_pattern], "priority": 1 }]
        }
    }))
}

/// Compare reported node names against the declared node groups
///
/// Surplus nodes are tolerated: they are expected while a group is being scaled in.
fn check_topology(instance: &str, groups: &[&SearchNode], nodes: &[String]) -> Result<()> {
    let mut problems = Vec::new();
    for group in groups {
        let prefix = format!("{}-", meta_name(instance, &group.name));
        let found = nodes.iter().filter(|n| n.starts_with(&prefix)).count();
        let expected = usize::try_from(group.replicas).unwrap_or(0);
        if found < expected {
            problems.push(format!("{}: expected {expected}, found {found}", group.name));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::NodeMismatch(problems.join("; ")))
    }
}
