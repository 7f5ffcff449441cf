//! Merging freshly rendered config artifacts into what already exists in the cluster
//!
//! Two policies are implemented here:
//!
//! - [`merge_reserved_keys`] decides by key name. Keys carrying the operator prefix are
//!   owned by the operator and always replaced; every other key belongs to a user and is
//!   copied through untouched.
//! - [`merge_scrape_jobs`] decides by scrape job. Jobs named like a default job are forced
//!   back to the default, foreign jobs survive, and missing default jobs are appended.
//!
//! Unparsable existing content is an error rather than something to overwrite.
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::collections::BTreeMap;

/// Merge rendered `defaults` over `existing` artifact data by key ownership
///
/// Keys starting with `prefix` are operator-owned: they are taken from `defaults`, and any
/// stale operator-owned key missing from `defaults` is dropped. All other keys of
/// `existing` are user-owned and kept verbatim.
pub fn merge_reserved_keys(
    existing: &BTreeMap<String, String>,
    defaults: &BTreeMap<String, String>,
    prefix: &str,
) -> BTreeMap<String, String> {
    let mut merged = defaults.clone();
    for (key, value) in existing {
        if !key.starts_with(prefix) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// One entry of `scrape_configs`
///
/// Only the job name is interpreted. Everything else is carried as an opaque mapping so
/// that settings this crate does not know about still round-trip.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ScrapeJob {
    /// Name the job is matched by
    pub job_name: String,
    /// Remaining settings of the job
    #[serde(flatten)]
    pub settings: Mapping,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct ScrapeDocument {
    #[serde(default)]
    scrape_configs: Vec<ScrapeJob>,
    #[serde(flatten)]
    rest: Mapping,
}

/// Outcome of [`merge_scrape_jobs`]
#[derive(Clone, Debug, PartialEq)]
pub struct ScrapeMerge {
    /// Merged job list: existing order first, then added defaults
    pub jobs: Vec<ScrapeJob>,
    /// Whether a default job was reverted or added
    pub changed: bool,
}

impl ScrapeMerge {
    /// Whether the merged list has to be written back over `existing`
    pub fn needs_write(&self, existing: &[ScrapeJob]) -> bool {
        !self.jobs.is_empty() && (self.changed || self.jobs.len() != existing.len())
    }
}

/// Merge default scrape jobs into the existing ones
pub fn merge_scrape_jobs(existing: &[ScrapeJob], defaults: &[ScrapeJob]) -> ScrapeMerge {
    let mut changed = false;
    let mut jobs: Vec<ScrapeJob> = existing
        .iter()
        .map(|job| match defaults.iter().find(|d| d.job_name == job.job_name) {
            Some(default) if default != job => {
                changed = true;
                default.clone()
            }
            _ => job.clone(),
        })
        .collect();

    for default in defaults {
        if !jobs.iter().any(|job| job.job_name == default.job_name) {
            changed = true;
            jobs.push(default.clone());
        }
    }
    ScrapeMerge { jobs, changed }
}

/// Reconcile a rendered scrape configuration document against the existing one
///
/// Returns the document to write, or `None` when the existing content already matches.
/// The written document is the rendered default with the merged job list, so top-level
/// settings such as `global` always follow the defaults.
pub fn reconcile_scrape_config(key: &str, existing: &str, defaults: &str) -> Result<Option<String>> {
    let current: ScrapeDocument = serde_yaml::from_str(existing).map_err(|source| Error::UnparsableArtifact {
        key: key.to_string(),
        source,
    })?;
    let mut rendered: ScrapeDocument =
        serde_yaml::from_str(defaults).map_err(|source| Error::RenderArtifact {
            key: key.to_string(),
            source,
        })?;

    let merge = merge_scrape_jobs(&current.scrape_configs, &rendered.scrape_configs);
    if !merge.needs_write(&current.scrape_configs) {
        return Ok(None);
    }
    rendered.scrape_configs = merge.jobs;
    serde_yaml::to_string(&rendered)
        .map(Some)
        .map_err(|source| Error::RenderArtifact {
            key: key.to_string(),
            source,
        })
}

/// Reconcile the data of a scrape configuration artifact
///
/// `key` names the document inside the artifact. An artifact without that key is treated
/// like a missing artifact and receives the defaults.
pub fn reconcile_scrape_artifact(
    key: &str,
    existing: &BTreeMap<String, String>,
    defaults: &BTreeMap<String, String>,
) -> Result<Option<BTreeMap<String, String>>> {
    let Some(current) = existing.get(key) else {
        return Ok(Some(defaults.clone()));
    };
    let rendered = defaults.get(key).map(String::as_str).unwrap_or_default();
    Ok(reconcile_scrape_config(key, current, rendered)?.map(|doc| {
        let mut data = defaults.clone();
        data.insert(key.to_string(), doc);
        data
    }))
}
