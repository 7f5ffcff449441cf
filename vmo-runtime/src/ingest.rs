//! Translating change events into controller triggers and live configuration swaps
use crate::{backlog::Backlog, Error, Result};
use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, ResourceExt,
};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vmo_core::{OperatorConfig, VerrazzanoMonitoringInstance};

/// Key of an instance: `namespace/name`
pub fn instance_key(vmi: &VerrazzanoMonitoringInstance) -> Option<String> {
    let name = vmi.metadata.name.as_deref()?;
    Some(match vmi.namespace() {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    })
}

/// Split an instance key into namespace and name
pub fn parse_key(key: &str) -> Result<(&str, &str)> {
    match key.split('/').collect::<Vec<_>>()[..] {
        [ns, name] if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

fn is_watched(vmi: &VerrazzanoMonitoringInstance, only: Option<&str>) -> bool {
    only.is_none_or(|only| vmi.metadata.name.as_deref() == Some(only))
}

/// Turn instance changes into controller triggers
///
/// Only the watched instance passes when `watch_vmi` is set. Every passing instance is
/// noted in `backlog` until a pass picks it up; watch errors are logged and dropped, the
/// watcher retries on its own.
pub fn triggers<S>(
    events: S,
    backlog: Backlog,
    watch_vmi: Option<String>,
) -> impl Stream<Item = std::result::Result<VerrazzanoMonitoringInstance, watcher::Error>> + Send + 'static
where
    S: Stream<Item = std::result::Result<VerrazzanoMonitoringInstance, watcher::Error>> + Send + 'static,
{
    events.filter_map(move |event| {
        let trigger = match event {
            Ok(vmi) if !is_watched(&vmi, watch_vmi.as_deref()) => None,
            Ok(vmi) => match instance_key(&vmi) {
                Some(key) => {
                    debug!(%key, "instance changed");
                    backlog.triggered(key);
                    Some(Ok(vmi))
                }
                None => {
                    warn!("ignoring instance without a name");
                    None
                }
            },
            Err(error) => {
                warn!(%error, "instance watch failed, retrying");
                None
            }
        };
        future::ready(trigger)
    })
}

/// The operator configuration currently in force
///
/// Readers take a cheap snapshot with [`LiveConfig::current`]. Replacement happens only
/// through [`LiveConfig::apply`], which keeps the last good configuration on bad input.
#[derive(Clone)]
pub struct LiveConfig {
    inner: Arc<RwLock<Applied>>,
}

struct Applied {
    config: Arc<OperatorConfig>,
    data: BTreeMap<String, String>,
}

impl LiveConfig {
    /// Start from a parsed configuration and the data it came from
    pub fn new(config: OperatorConfig, data: BTreeMap<String, String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Applied {
                config: Arc::new(config),
                data,
            })),
        }
    }

    /// Parse the initial configuration
    pub fn from_data(data: BTreeMap<String, String>) -> Result<Self> {
        let config = OperatorConfig::from_data(&data)?;
        Ok(Self::new(config, data))
    }

    /// Snapshot of the configuration in force
    pub fn current(&self) -> Arc<OperatorConfig> {
        self.inner.read().config.clone()
    }

    /// Swap in the configuration held by `data`
    ///
    /// Returns `Ok(false)` when `data` matches what was last applied. Malformed data is
    /// rejected with an error and the previous configuration stays in force.
    pub fn apply(&self, data: BTreeMap<String, String>) -> Result<bool> {
        if self.inner.read().data == data {
            return Ok(false);
        }
        let config = OperatorConfig::from_data(&data)?;
        let mut applied = self.inner.write();
        let changed = *applied.config != config;
        applied.data = data;
        if changed {
            applied.config = Arc::new(config);
        }
        Ok(changed)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(OperatorConfig::default(), BTreeMap::new())
    }
}

/// Load the operator configuration, falling back to defaults when the object is absent
pub async fn load_config(api: &Api<ConfigMap>, name: &str) -> Result<LiveConfig> {
    match api.get_opt(name).await? {
        Some(cm) => LiveConfig::from_data(cm.data.unwrap_or_default()),
        None => {
            warn!(config_map = name, "operator configuration not found, using defaults");
            Ok(LiveConfig::default())
        }
    }
}

/// Follow updates of the operator's configuration object until `token` fires
pub async fn watch_config(api: Api<ConfigMap>, name: String, live: LiveConfig, token: CancellationToken) {
    let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
    let events = watcher(api, config).default_backoff().applied_objects();
    apply_config_events(events, live, token).await;
}

async fn apply_config_events<S>(events: S, live: LiveConfig, token: CancellationToken)
where
    S: Stream<Item = std::result::Result<ConfigMap, watcher::Error>>,
{
    let mut events = std::pin::pin!(events.take_until(token.cancelled_owned()));
    while let Some(event) = events.next().await {
        match event {
            Ok(cm) => match live.apply(cm.data.unwrap_or_default()) {
                Ok(true) => info!(
                    config_map = %cm.metadata.name.unwrap_or_default(),
                    "operator configuration updated"
                ),
                Ok(false) => debug!("operator configuration unchanged"),
                Err(error) => warn!(
                    %error,
                    "rejected operator configuration update, keeping the previous one"
                ),
            },
            Err(error) => warn!(%error, "operator configuration watch failed, retrying"),
        }
    }
}
