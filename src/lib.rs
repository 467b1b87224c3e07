//! SDD resolve derives processing artifacts from Single Data Dictionary (SDD) metadata.
//! The SDD describes regulatory reporting data: domains of values, the members of each
//! domain, hierarchies that group members under more abstract ones, and links that declare
//! how a variable of one cube (a dataset structure) corresponds to a variable of another.
//! Processing code generators need those relationships turned into something they can use
//! directly, and this crate does that.
//!
//! # Member Sets
//! A member that appears as a parent in some hierarchy is a node. It does not stand for a
//! concrete value but for the set of leaves below it. Reports are usually expressed in terms
//! of nodes ("all loans and deposits") while data carries leaves ("loan"), so every node has
//! to be expanded into its leaves before it can be compared with data.
//!
//! Expansion goes through every hierarchy of the member's domain unless configured
//! otherwise, walks children depth-first and keeps the first occurrence of each leaf.
//! Hierarchies in the exports are not guaranteed to be trees: a member may appear below
//! several parents and cycles do occur. Both are handled without failing. Results are
//! memoized for the lifetime of the resolver.
//!
//! # Filters
//! A member link says that a primary member corresponds to a foreign member on an item link.
//! The set of member links of one item link therefore describes which rows of the foreign
//! cube are relevant. That set is rendered as a boolean predicate over a row binding:
//!
//! ```text
//! ((item.TYP_INSTRMNT == "LOAN") or (item.TYP_INSTRMNT == "DEPOSIT"))
//! ```
//!
//! Comparisons on the same variable are combined by `or`, comparisons on different
//! variables (all item links of a cube link) by `and`. A link without member links
//! restricts nothing and renders as `True`. The predicate is also available as an
//! [expr::Expression] tree that can be rendered, parsed back and evaluated against a row.
//!
//! # Related Entities
//! The logical data model that the cubes are derived from is a set of entity types with
//! relation fields and inheritance. For a given type, code generation needs to know every
//! type it can reach within a bounded number of relation and inheritance hops. Disjoint
//! subtyping is encoded by naming convention: a type holding a `<Sub>_delegate` field is a
//! supertype of `Sub`. Parent pointers (`parent_` prefix) and delegate fields are not
//! followed as relations.
//!
//! # YAML
//! Metadata snapshots, the entity schema and the configuration are read from YAML files.
//! Every configuration key has a default, so the configuration file is optional.

/// Identifier newtypes and the SDD records.
pub mod model;

/// Read access to the metadata, and an in-memory snapshot loaded from YAML.
pub mod store;

/// Node/leaf classification and child lists per hierarchy.
pub mod hierarchy;

/// Expansion of members into the concrete members they represent.
pub mod resolver;

/// Entity types of the logical data model and the related entity search.
pub mod schema;

/// Filter predicates derived from member links.
pub mod filter;

/// Boolean predicates over a row: rendering, parsing and evaluation.
pub mod expr;

/// Positions in the source of a parsed predicate.
pub mod span;

/// Referential integrity report for a metadata store.
pub mod audit;

/// Settings of a processing context, read from YAML.
pub mod config;

/// Processing context that ties the store, derived indexes and configuration together.
pub mod ctx;

pub use ctx::Ctx;

#[cfg(test)]
pub fn init_log() {
    use log::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // The handle has to stay alive for the whole test run.
        let handle = flexi_logger::Logger::with(LevelFilter::Trace)
            .format(format)
            .start()
            .unwrap();
        std::mem::forget(handle);
    });

    fn format(
        write: &mut dyn std::io::Write,
        _: &mut flexi_logger::DeferredNow,
        record: &Record,
    ) -> std::io::Result<()> {
        write.write_all(
            format!(
                "[{} {}:{}] {} - {}",
                record.level(),
                record.file().unwrap_or_default(),
                record.line().unwrap_or_default(),
                record.module_path().unwrap_or_default(),
                record.args()
            )
            .as_bytes(),
        )
    }
}

/// Reference of test files from the samples directory.
#[cfg(test)]
pub enum Sample {
    /// Instrument type domain with two hierarchies.
    Instruments,

    /// Cube link with item links and member links.
    Links,

    /// Entity types of a logical data model.
    Ldm,
}

#[cfg(test)]
impl From<Sample> for &'static str {
    fn from(sample: Sample) -> Self {
        use Sample::*;
        match sample {
            Instruments => include_str!("../samples/instruments.yaml"),
            Links => include_str!("../samples/links.yaml"),
            Ldm => include_str!("../samples/ldm.yaml"),
        }
    }
}
