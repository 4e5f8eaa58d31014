//! Local value set resolution.
//!
//! [`LocalValueSetResolver`] answers expansion requests from value set
//! definitions it has been given up front (JSON resources, Bundles, or a
//! directory of `.json` files). It never touches the network: a definition that
//! needs a terminology server to expand is reported as
//! [`ExpansionError::RequiresTerminologyService`].

use crate::error::ExpansionError;
use crate::expansion::{ValueSetResolver, split_versioned_url};
use crate::models::{ExpansionContains, ValueSet, ValueSetExpansion};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Resolves value sets from an in-memory set of definitions.
#[derive(Debug, Default, Clone)]
pub struct LocalValueSetResolver {
    by_url: HashMap<String, ValueSet>,
}

impl LocalValueSetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct value set URLs known.
    pub fn len(&self) -> usize {
        self.by_url.keys().filter(|key| !key.contains('|')).count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Registers a value set under `url` and, when versioned, `url|version`.
    ///
    /// A later definition with the same URL replaces the unversioned entry.
    pub fn add(&mut self, value_set: ValueSet) -> Result<(), ExpansionError> {
        let url = value_set
            .url
            .clone()
            .ok_or_else(|| ExpansionError::InvalidDefinition {
                location: "<value set>".to_string(),
                message: "value set has no url".to_string(),
            })?;

        if let Some(version) = &value_set.version {
            self.by_url
                .insert(format!("{}|{}", url, version), value_set.clone());
        }
        self.by_url.insert(url, value_set);
        Ok(())
    }

    /// Registers every ValueSet in a JSON resource, which may be a ValueSet or a
    /// Bundle of them. Returns how many were added.
    pub fn add_json(&mut self, json: Value, location: &str) -> Result<usize, ExpansionError> {
        match json.get("resourceType").and_then(Value::as_str) {
            Some("ValueSet") => {
                let value_set = parse_value_set(json, location)?;
                self.add(value_set)?;
                Ok(1)
            }
            Some("Bundle") => {
                let mut added = 0;
                let entries = json
                    .get("entry")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for entry in entries {
                    let Some(resource) = entry.get("resource") else {
                        continue;
                    };
                    if resource.get("resourceType").and_then(Value::as_str) == Some("ValueSet") {
                        let value_set = parse_value_set(resource.clone(), location)?;
                        self.add(value_set)?;
                        added += 1;
                    }
                }
                Ok(added)
            }
            other => {
                debug!("Ignoring non-ValueSet resource ({:?}) in {}", other, location);
                Ok(0)
            }
        }
    }

    /// Loads every `*.json` file of `dir`.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ExpansionError> {
        let dir = dir.as_ref();
        let mut resolver = Self::new();
        let mut entries = fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut total = 0;
        for path in paths {
            total += resolver.load_file(&path).await?;
        }
        info!("Loaded {} value sets from {}", total, dir.display());
        Ok(resolver)
    }

    /// Loads one JSON file holding a ValueSet or a Bundle of them.
    pub async fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, ExpansionError> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let contents = fs::read_to_string(path).await?;
        let json: Value =
            serde_json::from_str(&contents).map_err(|e| ExpansionError::InvalidDefinition {
                location: location.clone(),
                message: e.to_string(),
            })?;
        self.add_json(json, &location)
    }

    fn lookup(&self, url: &str) -> Option<&ValueSet> {
        let (base, version) = split_versioned_url(url);
        match version {
            Some(version) => self.by_url.get(&format!("{}|{}", base, version)),
            None => self.by_url.get(base),
        }
    }
}

fn parse_value_set(json: Value, location: &str) -> Result<ValueSet, ExpansionError> {
    serde_json::from_value(json).map_err(|e| ExpansionError::InvalidDefinition {
        location: location.to_string(),
        message: e.to_string(),
    })
}

/// Enumerates a compose made only of explicitly listed concepts.
///
/// Returns `None` when any include uses filters or value set imports, lacks a
/// system, or when there are excludes.
fn enumerate_compose(value_set: &ValueSet) -> Option<ValueSetExpansion> {
    let compose = value_set.compose.as_ref()?;
    if !compose.exclude.is_empty() || compose.include.is_empty() {
        return None;
    }

    let mut contains = Vec::new();
    for include in &compose.include {
        let system = include.system.as_ref()?;
        if !include.filter.is_empty() || !include.value_set.is_empty() || include.concept.is_empty()
        {
            return None;
        }
        contains.extend(include.concept.iter().map(|concept| ExpansionContains {
            system: Some(system.clone()),
            version: include.version.clone(),
            code: Some(concept.code.clone()),
            display: concept.display.clone(),
            ..Default::default()
        }));
    }

    Some(ValueSetExpansion {
        total: Some(contains.len() as u64),
        offset: None,
        contains,
    })
}

#[async_trait]
impl ValueSetResolver for LocalValueSetResolver {
    async fn expand_value_set_url(&self, url: &str) -> Result<ValueSet, ExpansionError> {
        let value_set = self
            .lookup(url)
            .ok_or_else(|| ExpansionError::UnknownValueSet(url.to_string()))?;

        if value_set.is_expanded() {
            return Ok(value_set.clone());
        }

        match enumerate_compose(value_set) {
            Some(expansion) => {
                let mut expanded = value_set.clone();
                expanded.expansion = Some(expansion);
                Ok(expanded)
            }
            None => {
                warn!("Value set {} needs a terminology service to expand", url);
                Err(ExpansionError::RequiresTerminologyService(url.to_string()))
            }
        }
    }
}
