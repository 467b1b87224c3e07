use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use serde::Deserialize;
use thiserror::Error;

use crate::model::*;

/// Kinds of records a [MetadataStore] can be asked for by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Domain,
    Member,
    MemberHierarchy,
    CubeLink,
    CubeStructureItemLink,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Domain => "domain",
            EntityKind::Member => "member",
            EntityKind::MemberHierarchy => "member hierarchy",
            EntityKind::CubeLink => "cube link",
            EntityKind::CubeStructureItemLink => "cube structure item link",
        };
        f.write_str(s)
    }
}

/// A record that was required to exist is missing from the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} `{id}` not found")]
pub struct NotFound {
    pub kind: EntityKind,
    pub id: String,
}

impl NotFound {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

pub type Iter<'a, T> = Box<dyn Iterator<Item = &'a T> + 'a>;

/// Read-only access to the SDD metadata.
///
/// Key lookups return `None` when a record is absent, which is the normal "no relationship"
/// outcome. Callers that need the record use the `require_*` methods, which turn absence
/// into [NotFound].
///
/// Iteration order of every method is the store's registration order. Generated artifacts
/// rely on it being stable.
pub trait MetadataStore {
    fn domain(&self, id: &DomainId) -> Option<&Domain>;

    fn member(&self, id: &MemberId) -> Option<&Member>;

    fn hierarchy(&self, id: &HierarchyId) -> Option<&MemberHierarchy>;

    fn cube_link(&self, id: &CubeLinkId) -> Option<&CubeLink>;

    fn item_link(&self, id: &ItemLinkId) -> Option<&CubeStructureItemLink>;

    fn domains(&self) -> Iter<'_, Domain>;

    fn members(&self) -> Iter<'_, Member>;

    fn hierarchies(&self) -> Iter<'_, MemberHierarchy>;

    fn hierarchy_nodes(&self) -> Iter<'_, MemberHierarchyNode>;

    fn member_links(&self) -> Iter<'_, MemberLink>;

    /// Item links that belong to the given cube link.
    fn item_links_of(&self, cube_link: &CubeLinkId) -> Iter<'_, CubeStructureItemLink>;

    /// Member links that instantiate the given item link.
    fn member_links_of(&self, item_link: &ItemLinkId) -> Iter<'_, MemberLink>;

    fn require_member(&self, id: &MemberId) -> Result<&Member, NotFound> {
        self.member(id)
            .ok_or_else(|| NotFound::new(EntityKind::Member, id.as_str()))
    }

    fn require_cube_link(&self, id: &CubeLinkId) -> Result<&CubeLink, NotFound> {
        self.cube_link(id)
            .ok_or_else(|| NotFound::new(EntityKind::CubeLink, id.as_str()))
    }

    fn require_item_link(&self, id: &ItemLinkId) -> Result<&CubeStructureItemLink, NotFound> {
        self.item_link(id)
            .ok_or_else(|| NotFound::new(EntityKind::CubeStructureItemLink, id.as_str()))
    }
}

/// Fully loaded, in-memory copy of the metadata, keyed for lookups.
#[derive(Debug, Default)]
pub struct MetadataSnapshot {
    domains: Vec<Domain>,
    members: Vec<Member>,
    hierarchies: Vec<MemberHierarchy>,
    nodes: Vec<MemberHierarchyNode>,
    cube_links: Vec<CubeLink>,
    item_links: Vec<CubeStructureItemLink>,
    member_links: Vec<MemberLink>,

    domain_idx: HashMap<DomainId, usize>,
    member_idx: HashMap<MemberId, usize>,
    hierarchy_idx: HashMap<HierarchyId, usize>,
    cube_link_idx: HashMap<CubeLinkId, usize>,
    item_link_idx: HashMap<ItemLinkId, usize>,
    item_links_by_cube_link: HashMap<CubeLinkId, Vec<usize>>,
    member_links_by_item_link: HashMap<ItemLinkId, Vec<usize>>,
}

impl MetadataSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Load a snapshot from a YAML document listing every record kind.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadError> {
        let doc: SnapshotDocument = serde_yml::from_str(yaml)?;
        doc.into_builder().build().map_err(LoadError::Build)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, LoadError> {
        debug!("Loading metadata snapshot from {}", path.display());
        let yaml = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }
}

impl MetadataStore for MetadataSnapshot {
    fn domain(&self, id: &DomainId) -> Option<&Domain> {
        self.domain_idx.get(id).map(|&i| &self.domains[i])
    }

    fn member(&self, id: &MemberId) -> Option<&Member> {
        self.member_idx.get(id).map(|&i| &self.members[i])
    }

    fn hierarchy(&self, id: &HierarchyId) -> Option<&MemberHierarchy> {
        self.hierarchy_idx.get(id).map(|&i| &self.hierarchies[i])
    }

    fn cube_link(&self, id: &CubeLinkId) -> Option<&CubeLink> {
        self.cube_link_idx.get(id).map(|&i| &self.cube_links[i])
    }

    fn item_link(&self, id: &ItemLinkId) -> Option<&CubeStructureItemLink> {
        self.item_link_idx.get(id).map(|&i| &self.item_links[i])
    }

    fn domains(&self) -> Iter<'_, Domain> {
        Box::new(self.domains.iter())
    }

    fn members(&self) -> Iter<'_, Member> {
        Box::new(self.members.iter())
    }

    fn hierarchies(&self) -> Iter<'_, MemberHierarchy> {
        Box::new(self.hierarchies.iter())
    }

    fn hierarchy_nodes(&self) -> Iter<'_, MemberHierarchyNode> {
        Box::new(self.nodes.iter())
    }

    fn member_links(&self) -> Iter<'_, MemberLink> {
        Box::new(self.member_links.iter())
    }

    fn item_links_of(&self, cube_link: &CubeLinkId) -> Iter<'_, CubeStructureItemLink> {
        let idx = self
            .item_links_by_cube_link
            .get(cube_link)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Box::new(idx.iter().map(|&i| &self.item_links[i]))
    }

    fn member_links_of(&self, item_link: &ItemLinkId) -> Iter<'_, MemberLink> {
        let idx = self
            .member_links_by_item_link
            .get(item_link)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Box::new(idx.iter().map(|&i| &self.member_links[i]))
    }
}

/// Collects records and then validates them into a [MetadataSnapshot].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    domains: Vec<Domain>,
    members: Vec<Member>,
    hierarchies: Vec<MemberHierarchy>,
    nodes: Vec<MemberHierarchyNode>,
    cube_links: Vec<CubeLink>,
    item_links: Vec<CubeStructureItemLink>,
    member_links: Vec<MemberLink>,
}

impl SnapshotBuilder {
    pub fn add_domain(&mut self, domain: Domain) -> &mut Self {
        self.domains.push(domain);
        self
    }

    pub fn add_member(&mut self, member: Member) -> &mut Self {
        self.members.push(member);
        self
    }

    pub fn add_hierarchy(&mut self, hierarchy: MemberHierarchy) -> &mut Self {
        self.hierarchies.push(hierarchy);
        self
    }

    pub fn add_node(&mut self, node: MemberHierarchyNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn add_cube_link(&mut self, link: CubeLink) -> &mut Self {
        self.cube_links.push(link);
        self
    }

    pub fn add_item_link(&mut self, link: CubeStructureItemLink) -> &mut Self {
        self.item_links.push(link);
        self
    }

    pub fn add_member_link(&mut self, link: MemberLink) -> &mut Self {
        self.member_links.push(link);
        self
    }

    /// Validate the collected records and build the snapshot.
    ///
    /// Only key uniqueness is checked here. Dangling references are accepted, see
    /// [crate::audit] for a completeness check.
    pub fn build(self) -> Result<MetadataSnapshot, Vec<SnapshotBuildError>> {
        let mut errors = Vec::new();

        trace!("Index keyed records");
        let domain_idx = key_index(&self.domains, |d| &d.domain_id, EntityKind::Domain, &mut errors);
        let member_idx = key_index(&self.members, |m| &m.member_id, EntityKind::Member, &mut errors);
        let hierarchy_idx = key_index(
            &self.hierarchies,
            |h| &h.member_hierarchy_id,
            EntityKind::MemberHierarchy,
            &mut errors,
        );
        let cube_link_idx = key_index(
            &self.cube_links,
            |l| &l.cube_link_id,
            EntityKind::CubeLink,
            &mut errors,
        );
        let item_link_idx = key_index(
            &self.item_links,
            |l| &l.cube_structure_item_link_id,
            EntityKind::CubeStructureItemLink,
            &mut errors,
        );

        if !errors.is_empty() {
            return Err(errors);
        }

        trace!("Group links by owner");
        let mut item_links_by_cube_link: HashMap<CubeLinkId, Vec<usize>> = HashMap::new();
        for (i, link) in self.item_links.iter().enumerate() {
            if let Some(owner) = &link.cube_link_id {
                item_links_by_cube_link.entry(owner.clone()).or_default().push(i);
            }
        }

        let mut member_links_by_item_link: HashMap<ItemLinkId, Vec<usize>> = HashMap::new();
        for (i, link) in self.member_links.iter().enumerate() {
            member_links_by_item_link
                .entry(link.cube_structure_item_link_id.clone())
                .or_default()
                .push(i);
        }

        debug!(
            "Snapshot built: {} domains, {} members, {} hierarchies, {} nodes, {} item links, {} member links",
            self.domains.len(),
            self.members.len(),
            self.hierarchies.len(),
            self.nodes.len(),
            self.item_links.len(),
            self.member_links.len(),
        );

        Ok(MetadataSnapshot {
            domains: self.domains,
            members: self.members,
            hierarchies: self.hierarchies,
            nodes: self.nodes,
            cube_links: self.cube_links,
            item_links: self.item_links,
            member_links: self.member_links,
            domain_idx,
            member_idx,
            hierarchy_idx,
            cube_link_idx,
            item_link_idx,
            item_links_by_cube_link,
            member_links_by_item_link,
        })
    }
}

fn key_index<T, K>(
    records: &[T],
    key: impl Fn(&T) -> &K,
    kind: EntityKind,
    errors: &mut Vec<SnapshotBuildError>,
) -> HashMap<K, usize>
where
    K: Clone + Eq + std::hash::Hash + std::fmt::Display,
{
    let mut idx = HashMap::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let k = key(record);
        if idx.insert(k.clone(), i).is_some() {
            errors.push(SnapshotBuildError::DuplicateKey {
                kind,
                id: k.to_string(),
            });
        }
    }
    idx
}

#[derive(Debug, Error)]
pub enum SnapshotBuildError {
    #[error("Duplicated {kind} key `{id}`")]
    DuplicateKey { kind: EntityKind, id: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read metadata file `{path}`. {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed metadata YAML. {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error(
        "Metadata snapshot is invalid: {}",
        .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    Build(Vec<SnapshotBuildError>),
}

/// On-disk shape of a snapshot.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SnapshotDocument {
    domains: Vec<Domain>,
    members: Vec<Member>,
    member_hierarchies: Vec<MemberHierarchy>,
    member_hierarchy_nodes: Vec<MemberHierarchyNode>,
    cube_links: Vec<CubeLink>,
    cube_structure_item_links: Vec<CubeStructureItemLink>,
    member_links: Vec<MemberLink>,
}

impl SnapshotDocument {
    fn into_builder(self) -> SnapshotBuilder {
        let mut builder = SnapshotBuilder::default();
        for domain in self.domains {
            builder.add_domain(domain);
        }
        for member in self.members {
            builder.add_member(member);
        }
        for hierarchy in self.member_hierarchies {
            builder.add_hierarchy(hierarchy);
        }
        for node in self.member_hierarchy_nodes {
            builder.add_node(node);
        }
        for link in self.cube_links {
            builder.add_cube_link(link);
        }
        for link in self.cube_structure_item_links {
            builder.add_item_link(link);
        }
        for link in self.member_links {
            builder.add_member_link(link);
        }
        builder
    }
}
