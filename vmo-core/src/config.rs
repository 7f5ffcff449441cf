//! Operator-wide settings read from the operator's own ConfigMap
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the operator ConfigMap that holds the yaml document
pub const CONFIG_KEY: &str = "config";

/// Settings that can be changed at runtime by editing the operator ConfigMap
///
/// Every key is optional. Unknown keys are ignored so that older operators keep working
/// against newer ConfigMaps.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Environment name recorded in the status of every instance
    pub env_name: String,
    /// Replica count used for simple components that leave it unset
    pub default_simple_component_replicas: i32,
    /// Storage class for claims when the instance does not name one
    pub default_storage_class: Option<String>,
    /// Fewest data nodes with which the search cluster may be resized
    pub min_data_nodes_for_resize: i32,
    /// Port of the management server (`/health`, `/metrics`)
    pub http_port: u16,
    /// How long queued work may sit unprocessed before the operator reports unhealthy
    pub queue_stall_seconds: u64,
    /// Request timeout towards the search cluster
    pub search_cluster_timeout_seconds: u64,
    /// Key prefix marking operator-owned alert rule files
    pub alert_rule_prefix: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            env_name: String::new(),
            default_simple_component_replicas: 1,
            default_storage_class: None,
            min_data_nodes_for_resize: 2,
            http_port: 8080,
            queue_stall_seconds: 60,
            search_cluster_timeout_seconds: 10,
            alert_rule_prefix: "vmo-".into(),
        }
    }
}

impl OperatorConfig {
    /// Parse the configuration out of ConfigMap data
    ///
    /// A missing or empty `config` key yields the defaults.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let config = match data.get(CONFIG_KEY) {
            Some(text) if !text.trim().is_empty() => {
                serde_yaml::from_str::<Self>(text).map_err(Error::InvalidOperatorConfig)?
            }
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.default_simple_component_replicas < 1 {
            return Err(Error::InvalidConfigValue {
                key: "defaultSimpleComponentReplicas",
                reason: format!("must be at least 1, got {}", self.default_simple_component_replicas),
            });
        }
        if self.min_data_nodes_for_resize < 1 {
            return Err(Error::InvalidConfigValue {
                key: "minDataNodesForResize",
                reason: format!("must be at least 1, got {}", self.min_data_nodes_for_resize),
            });
        }
        if self.http_port == 0 {
            return Err(Error::InvalidConfigValue {
                key: "httpPort",
                reason: "must not be 0".into(),
            });
        }
        if self.alert_rule_prefix.is_empty() {
            return Err(Error::InvalidConfigValue {
                key: "alertRulePrefix",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(config: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(CONFIG_KEY.to_string(), config.to_string())])
    }

    #[test]
    fn missing_key_gives_defaults() {
        let config = OperatorConfig::from_data(&BTreeMap::new()).unwrap();
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = OperatorConfig::from_data(&data(
            "envName: prod\ndefaultSimpleComponentReplicas: 3\nsomethingNew: true\n",
        ))
        .unwrap();
        assert_eq!(config.env_name, "prod");
        assert_eq!(config.default_simple_component_replicas, 3);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.min_data_nodes_for_resize, 2);
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let err = OperatorConfig::from_data(&data("envName: [unterminated")).unwrap_err();
        assert!(matches!(err, Error::InvalidOperatorConfig(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = OperatorConfig::from_data(&data("minDataNodesForResize: 0")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { key: "minDataNodesForResize", .. }));
        let err = OperatorConfig::from_data(&data("httpPort: 0")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { key: "httpPort", .. }));
    }
}
