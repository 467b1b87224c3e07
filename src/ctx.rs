use std::path::Path;

use log::info;
use thiserror::Error;

use crate::audit::{self, IntegrityIssue};
use crate::config::{Config, ConfigError};
use crate::filter::FilterBuilder;
use crate::hierarchy::HierarchyIndex;
use crate::resolver::MemberSetResolver;
use crate::schema::{EntitySchema, SchemaLoadError};
use crate::store::{LoadError, MetadataSnapshot, MetadataStore};

/// Processing context: a metadata store together with everything derived from it once.
///
/// The hierarchy index is built when the context is created and never changes afterwards.
/// Resolvers and filter builders borrow from the context, so they cannot outlive it.
#[derive(Debug)]
pub struct Ctx<S: MetadataStore = MetadataSnapshot> {
    store: S,
    index: HierarchyIndex,
    config: Config,
    schema: Option<EntitySchema>,
}

impl<S: MetadataStore> Ctx<S> {
    pub fn new(store: S, config: Config) -> Self {
        let index = HierarchyIndex::from_store(&store);
        info!("Context ready with {} hierarchy nodes", index.node_count());
        Self {
            store,
            index,
            config,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &HierarchyIndex {
        &self.index
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> Option<&EntitySchema> {
        self.schema.as_ref()
    }

    /// New member set resolver with an empty cache, scoped as configured.
    pub fn member_sets(&self) -> MemberSetResolver<'_, S> {
        MemberSetResolver::with_scope(&self.store, &self.index, self.config.resolver.scope)
    }

    pub fn filters(&self) -> FilterBuilder<'_, S> {
        FilterBuilder::with_config(&self.store, self.config.filter.clone())
    }

    /// Entity types related to `entity`. Empty when no schema is attached.
    pub fn related_entities(&self, entity: &str) -> Vec<&str> {
        self.schema
            .as_ref()
            .map(|schema| schema.related_entities(entity))
            .unwrap_or_default()
    }

    pub fn audit(&self) -> Vec<IntegrityIssue> {
        audit::audit(&self.store)
    }
}

impl Ctx<MetadataSnapshot> {
    /// Load a context from YAML files. Without a configuration file the defaults apply.
    pub fn load(
        metadata: &Path,
        config: Option<&Path>,
        schema: Option<&Path>,
    ) -> Result<Self, CtxError> {
        let config = match config {
            Some(path) => Config::from_yaml_file(path)?,
            None => Config::default(),
        };
        let schema = schema
            .map(|path| EntitySchema::from_yaml_file(path, config.search.clone()))
            .transpose()?;
        let store = MetadataSnapshot::from_yaml_file(metadata)?;

        let mut ctx = Self::new(store, config);
        ctx.schema = schema;
        Ok(ctx)
    }
}

#[derive(Debug, Error)]
pub enum CtxError {
    #[error(transparent)]
    Metadata(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaLoadError),
}
