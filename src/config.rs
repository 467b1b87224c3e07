use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Settings of one processing context. Every field has a default, so an empty YAML
/// document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub search: SearchConfig,
    pub filter: FilterConfig,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // `serde_yml` rejects an empty document instead of treating it as an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    pub scope: HierarchyScope,
}

/// Which hierarchies the member set resolver expands through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyScope {
    /// Every hierarchy of the member's domain, whatever hierarchy was asked for.
    #[default]
    Domain,

    /// Only the hierarchy that was asked for. Without one, falls back to [Self::Domain].
    Named,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub max_superclass_depth: usize,
    pub max_relation_depth: usize,

    /// Suffix of relation fields that encode disjoint subtyping.
    pub delegate_suffix: String,

    /// Prefix of relation fields that point back to a containing entity.
    pub parent_prefix: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_superclass_depth: 4,
            max_relation_depth: 4,
            delegate_suffix: "_delegate".to_owned(),
            parent_prefix: "parent_".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Name the generated code binds the filtered row to.
    pub item_binding: String,

    pub order: FilterOrder,

    /// Upper bound on the members one variable group may compare against.
    pub max_disjuncts: Option<usize>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            item_binding: "item".to_owned(),
            order: FilterOrder::default(),
            max_disjuncts: None,
        }
    }
}

/// Order of groups and members in generated filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOrder {
    /// Groups by first appearance, members in store order.
    #[default]
    Store,

    /// Groups by variable code, members by member code.
    Sorted,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file `{path}`. {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config YAML. {0}")]
    Yaml(#[from] serde_yml::Error),
}
