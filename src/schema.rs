use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};
use serde::Deserialize;
use smallvec::SmallVec;
use thiserror::Error;

use crate::config::SearchConfig;

/// Introspectable record type of the logical data model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityType {
    pub name: String,

    /// Structural (single) inheritance.
    #[serde(default)]
    pub superclass: Option<String>,

    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(default)]
    pub kind: FieldKind,

    /// Referenced entity type of a relation field.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Attribute,
    ForeignKey,
    OneToOne,
    ManyToMany,
}

impl FieldKind {
    /// Whether the field points at exactly one other record.
    pub fn is_foreign_key_like(&self) -> bool {
        matches!(self, FieldKind::ForeignKey | FieldKind::OneToOne)
    }
}

/// Set of entity types with the derived lookups the related entity search needs.
///
/// Disjoint subtyping is expressed by naming convention: a type `S` holding a relation field
/// `<T>_delegate` is a supertype of `T`. The reverse lookup `T -> [S]` is computed once when
/// the schema is built.
#[derive(Debug)]
pub struct EntitySchema {
    types: Vec<EntityType>,
    by_name: HashMap<String, usize>,
    delegate_supertypes: HashMap<String, SmallVec<[usize; 2]>>,
    config: SearchConfig,
}

impl EntitySchema {
    pub fn builder() -> EntitySchemaBuilder {
        EntitySchemaBuilder::default()
    }

    pub fn from_yaml_str(yaml: &str, config: SearchConfig) -> Result<Self, SchemaLoadError> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            entities: Vec<EntityType>,
        }

        let doc: Document = serde_yml::from_str(yaml)?;
        let mut builder = EntitySchemaBuilder::with_config(config);
        for entity in doc.entities {
            builder.add_type(entity);
        }
        builder.build().map_err(SchemaLoadError::Build)
    }

    pub fn from_yaml_file(path: &Path, config: SearchConfig) -> Result<Self, SchemaLoadError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&yaml, config)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types related to `entity` within the configured depths.
    pub fn related_entities(&self, entity: &str) -> Vec<&str> {
        self.related_entities_within(
            entity,
            self.config.max_superclass_depth,
            self.config.max_relation_depth,
        )
    }

    /// Types reachable from `entity` through relation fields and supertypes.
    ///
    /// Every relation hop consumes one unit of `max_relation_depth`, every supertype hop one
    /// unit of `max_superclass_depth`. Relation fields named with the parent prefix and
    /// delegate fields are not followed. The result is in discovery order, holds each type
    /// once and never contains `entity` itself. An unknown `entity` has no relations.
    ///
    /// A type is expanded again only when reached with more budget left on some axis than
    /// before, so cycles end as soon as they stop adding budget, whatever the depths.
    pub fn related_entities_within(
        &self,
        entity: &str,
        max_superclass_depth: usize,
        max_relation_depth: usize,
    ) -> Vec<&str> {
        let Some(&root) = self.by_name.get(entity) else {
            debug!("Entity type `{entity}` is not part of the schema");
            return Vec::new();
        };

        let mut search = Search {
            root,
            found: Vec::new(),
            present: HashSet::new(),
            expanded: HashMap::new(),
            queue: VecDeque::new(),
        };
        search.push(root, max_relation_depth, max_superclass_depth);

        while let Some((ty, relation_depth, superclass_depth)) = search.queue.pop_front() {
            if relation_depth > 0 {
                for target in self.relation_targets(ty) {
                    trace!("{} -> {}", self.types[ty].name, self.types[target].name);
                    search.add(target);
                    search.push(target, relation_depth - 1, superclass_depth);
                }
            }

            if superclass_depth > 0 {
                for supertype in self.supertypes(ty) {
                    trace!("{} is-a {}", self.types[ty].name, self.types[supertype].name);
                    search.add(supertype);
                    search.push(supertype, relation_depth, superclass_depth - 1);
                }
            }
        }

        debug!("{} related entity types for `{entity}`", search.found.len());
        search
            .found
            .into_iter()
            .map(|i| self.types[i].name.as_str())
            .collect()
    }

    fn relation_targets(&self, ty: usize) -> SmallVec<[usize; 8]> {
        let entity = &self.types[ty];
        entity
            .fields
            .iter()
            .filter(|f| f.kind.is_foreign_key_like())
            .filter(|f| !f.name.starts_with(self.config.parent_prefix.as_str()))
            .filter(|f| !f.name.ends_with(self.config.delegate_suffix.as_str()))
            .filter_map(|f| {
                let target = f.target.as_deref()?;
                let found = self.by_name.get(target).copied();
                if found.is_none() {
                    warn!("{}.{} points at unknown type `{target}`", entity.name, f.name);
                }
                found
            })
            .collect()
    }

    fn supertypes(&self, ty: usize) -> SmallVec<[usize; 4]> {
        let entity = &self.types[ty];
        let mut out: SmallVec<[usize; 4]> = self
            .delegate_supertypes
            .get(&entity.name)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default();

        if let Some(superclass) = &entity.superclass {
            match self.by_name.get(superclass) {
                Some(&i) => out.push(i),
                None => warn!("{} extends unknown type `{superclass}`", entity.name),
            }
        }
        out
    }
}

/// Breadth-first walk over `(type, relation depth left, superclass depth left)` states.
struct Search {
    root: usize,
    found: Vec<usize>,
    present: HashSet<usize>,

    /// Budgets each type was queued with. None of them covers another on both axes.
    expanded: HashMap<usize, SmallVec<[(usize, usize); 2]>>,
    queue: VecDeque<(usize, usize, usize)>,
}

impl Search {
    fn add(&mut self, ty: usize) {
        if ty != self.root && self.present.insert(ty) {
            self.found.push(ty);
        }
    }

    /// Queue `ty` unless it was already queued with at least this budget on both axes.
    fn push(&mut self, ty: usize, relation_depth: usize, superclass_depth: usize) {
        let budgets = self.expanded.entry(ty).or_default();
        if budgets
            .iter()
            .any(|&(r, s)| r >= relation_depth && s >= superclass_depth)
        {
            return;
        }
        budgets.retain(|&mut (r, s)| r > relation_depth || s > superclass_depth);
        budgets.push((relation_depth, superclass_depth));
        self.queue.push_back((ty, relation_depth, superclass_depth));
    }
}

#[derive(Debug, Default)]
pub struct EntitySchemaBuilder {
    types: Vec<EntityType>,
    config: SearchConfig,
}

impl EntitySchemaBuilder {
    pub fn with_config(config: SearchConfig) -> Self {
        Self {
            types: Vec::new(),
            config,
        }
    }

    pub fn add_type(&mut self, entity: EntityType) -> &mut Self {
        self.types.push(entity);
        self
    }

    /// Index the types by name and precompute the delegate supertypes.
    pub fn build(self) -> Result<EntitySchema, Vec<SchemaBuildError>> {
        let mut errors = Vec::new();
        let mut by_name = HashMap::with_capacity(self.types.len());
        for (i, entity) in self.types.iter().enumerate() {
            if by_name.insert(entity.name.clone(), i).is_some() {
                errors.push(SchemaBuildError::DuplicatedType(entity.name.clone()));
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let suffix = self.config.delegate_suffix.as_str();
        let mut delegate_supertypes: HashMap<String, SmallVec<[usize; 2]>> = HashMap::new();
        for (i, entity) in self.types.iter().enumerate() {
            for field in entity.fields.iter().filter(|f| f.kind.is_foreign_key_like()) {
                let Some(base) = field.name.strip_suffix(suffix) else {
                    continue;
                };
                if base.is_empty() {
                    continue;
                }
                let supertypes = delegate_supertypes.entry(base.to_owned()).or_default();
                if !supertypes.contains(&i) {
                    supertypes.push(i);
                }
            }
        }

        debug!(
            "Entity schema built: {} types, {} with delegate supertypes",
            self.types.len(),
            delegate_supertypes.len()
        );

        Ok(EntitySchema {
            types: self.types,
            by_name,
            delegate_supertypes,
            config: self.config,
        })
    }
}

#[derive(Debug, Error)]
pub enum SchemaBuildError {
    #[error("Entity type `{0}` is defined more than once")]
    DuplicatedType(String),
}

#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("Failed to read schema file `{path}`. {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed schema YAML. {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error(
        "Entity schema is invalid: {}",
        .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    Build(Vec<SchemaBuildError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sample;

    fn fk(name: &str, target: &str) -> Field {
        Field {
            name: name.to_owned(),
            kind: FieldKind::ForeignKey,
            target: Some(target.to_owned()),
        }
    }

    fn entity(name: &str, fields: Vec<Field>) -> EntityType {
        EntityType {
            name: name.to_owned(),
            superclass: None,
            fields,
        }
    }

    fn sample() -> EntitySchema {
        EntitySchema::from_yaml_str(Sample::Ldm.into(), SearchConfig::default()).unwrap()
    }

    #[test]
    fn test_relation_depth_bound() {
        let mut builder = EntitySchema::builder();
        for i in 0..10 {
            let fields = if i < 9 {
                vec![fk("next", &format!("T{}", i + 1))]
            } else {
                vec![]
            };
            builder.add_type(entity(&format!("T{i}"), fields));
        }
        let schema = builder.build().unwrap();

        let related = schema.related_entities_within("T0", 4, 4);
        assert_eq!(related, ["T1", "T2", "T3", "T4"]);
        assert!(!related.contains(&"T9"));

        assert_eq!(schema.related_entities_within("T0", 4, 0), Vec::<&str>::new());
        assert_eq!(schema.related_entities_within("T5", 0, 9), ["T6", "T7", "T8", "T9"]);
    }

    #[test]
    fn test_sample_loan() {
        crate::init_log();

        let schema = sample();
        let related = schema.related_entities("Loan");

        // Through the delegate on Instrument, the superclass, and plain foreign keys.
        for expected in ["Instrument", "Credit_facility", "Party", "Currency", "Entity"] {
            assert!(related.contains(&expected), "{expected} missing from {related:?}");
        }
        // Parent pointers and delegate fields are not followed.
        assert!(!related.contains(&"Portfolio"));
        assert!(!related.contains(&"Loan"));
        // Related through a type that is only reachable from the supertype.
        assert!(related.contains(&"Protection"));
    }

    #[test]
    fn test_delegate_supertypes_precomputed() {
        let schema = sample();
        let related = schema.related_entities_within("Deposit", 1, 0);
        assert_eq!(related, ["Instrument"]);

        let related = schema.related_entities_within("Instrument", 1, 0);
        assert!(related.is_empty(), "{related:?}");
    }

    #[test]
    fn test_cycles_terminate() {
        let mut builder = EntitySchema::builder();
        builder
            .add_type(entity("A", vec![fk("b", "B")]))
            .add_type(entity("B", vec![fk("a", "A"), fk("c", "C")]))
            .add_type(entity("C", vec![fk("a", "A")]));
        let schema = builder.build().unwrap();

        assert_eq!(schema.related_entities_within("A", 4, 100), ["B", "C"]);
    }

    #[test]
    fn test_cycles_with_huge_depth() {
        let mut builder = EntitySchema::builder();
        builder
            .add_type(EntityType {
                name: "A".to_owned(),
                superclass: Some("B".to_owned()),
                fields: vec![fk("b", "B")],
            })
            .add_type(EntityType {
                name: "B".to_owned(),
                superclass: Some("A".to_owned()),
                fields: vec![fk("a", "A")],
            });
        let schema = builder.build().unwrap();

        assert_eq!(schema.related_entities_within("A", 0, 20_000), ["B"]);
        assert_eq!(schema.related_entities_within("A", 1_000_000, 1_000_000), ["B"]);
        assert_eq!(schema.related_entities_within("B", usize::MAX, 0), ["A"]);
    }

    #[test]
    fn test_unknown_references_skipped() {
        let mut builder = EntitySchema::builder();
        builder.add_type(EntityType {
            name: "A".to_owned(),
            superclass: Some("Ghost".to_owned()),
            fields: vec![fk("b", "Nowhere"), fk("c", "C")],
        });
        builder.add_type(entity("C", vec![]));
        let schema = builder.build().unwrap();

        assert_eq!(schema.related_entities("A"), ["C"]);
        assert!(schema.related_entities("Unknown").is_empty());
    }

    #[test]
    fn test_duplicate_types_rejected() {
        let mut builder = EntitySchema::builder();
        builder.add_type(entity("A", vec![])).add_type(entity("A", vec![]));
        let errors = builder.build().unwrap_err();
        assert!(matches!(&errors[..], [SchemaBuildError::DuplicatedType(name)] if name == "A"));
    }

    #[test]
    fn test_load_file() {
        let path = Path::new("samples/ldm.yaml");
        let schema = EntitySchema::from_yaml_file(path, SearchConfig::default()).unwrap();
        assert_eq!(schema.len(), 9);
        assert_eq!(schema.entity("Loan").unwrap().superclass.as_deref(), Some("Entity"));
        assert_eq!(schema.related_entities("Loan"), sample().related_entities("Loan"));

        let err = EntitySchema::from_yaml_file(Path::new("samples/missing.yaml"), SearchConfig::default())
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Io { .. }));
    }
}
