use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use smallvec::SmallVec;

use crate::model::{DomainId, HierarchyId, MemberHierarchy, MemberHierarchyNode, MemberId};
use crate::store::MetadataStore;

/// Direct children of one parent within one hierarchy, in first-seen order.
pub type Children = SmallVec<[MemberId; 4]>;

/// Derived lookup structures over the member hierarchies of one processing context.
///
/// The index is an immutable value: it is produced once from a complete set of hierarchy
/// nodes and hierarchies and never updated. A change in the metadata requires building a new
/// index (and discarding every resolver built on the old one).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HierarchyIndex {
    /// Members that are the parent of at least one other member in some hierarchy.
    nodes: HashSet<MemberId>,

    /// Hierarchy -> parent -> direct children.
    children: HashMap<HierarchyId, HashMap<MemberId, Children>>,

    /// Hierarchies of each domain, in registration order.
    domain_hierarchies: HashMap<DomainId, SmallVec<[HierarchyId; 2]>>,
}

impl HierarchyIndex {
    /// Build the index from already loaded nodes and hierarchies.
    ///
    /// Nodes without a parent are roots and contribute nothing. References to unknown
    /// members or hierarchies are not checked here.
    pub fn build<'a>(
        nodes: impl IntoIterator<Item = &'a MemberHierarchyNode>,
        hierarchies: impl IntoIterator<Item = &'a MemberHierarchy>,
    ) -> Self {
        let mut builder = HierarchyIndexBuilder::default();
        builder.scan_nodes(nodes);
        builder.scan_hierarchies(hierarchies);
        builder.finish()
    }

    pub fn from_store(store: &(impl MetadataStore + ?Sized)) -> Self {
        Self::build(store.hierarchy_nodes(), store.hierarchies())
    }

    /// Whether the member stands for a set of other members.
    pub fn is_node(&self, member: &MemberId) -> bool {
        self.nodes.contains(member)
    }

    /// Whether the member is a concrete value, i.e. not the parent of anything.
    pub fn is_leaf(&self, member: &MemberId) -> bool {
        !self.is_node(member)
    }

    /// Direct children of `parent` within `hierarchy`.
    ///
    /// `None` means the pair has no recorded children. That is the regular end of a branch,
    /// not an error.
    pub fn children(&self, parent: &MemberId, hierarchy: &HierarchyId) -> Option<&[MemberId]> {
        self.children
            .get(hierarchy)?
            .get(parent)
            .map(SmallVec::as_slice)
    }

    /// Hierarchies defined over the domain. Empty for unknown domains.
    pub fn hierarchies_of(&self, domain: &DomainId) -> &[HierarchyId] {
        self.domain_hierarchies
            .get(domain)
            .map(SmallVec::as_slice)
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Accumulates scans into a [HierarchyIndex]. Scanning the same records more than once
/// leaves the result unchanged.
#[derive(Debug, Default)]
pub struct HierarchyIndexBuilder {
    index: HierarchyIndex,
}

impl HierarchyIndexBuilder {
    pub fn scan_nodes<'a>(&mut self, nodes: impl IntoIterator<Item = &'a MemberHierarchyNode>) {
        for node in nodes {
            let Some(parent) = &node.parent_member_id else {
                continue;
            };

            self.index.nodes.insert(parent.clone());

            let children = self
                .index
                .children
                .entry(node.member_hierarchy_id.clone())
                .or_default()
                .entry(parent.clone())
                .or_default();
            if !children.contains(&node.member_id) {
                trace!(
                    "{}: {} -> {}",
                    node.member_hierarchy_id,
                    parent,
                    node.member_id
                );
                children.push(node.member_id.clone());
            }
        }
    }

    pub fn scan_hierarchies<'a>(
        &mut self,
        hierarchies: impl IntoIterator<Item = &'a MemberHierarchy>,
    ) {
        for hierarchy in hierarchies {
            let list = self
                .index
                .domain_hierarchies
                .entry(hierarchy.domain_id.clone())
                .or_default();
            if !list.contains(&hierarchy.member_hierarchy_id) {
                list.push(hierarchy.member_hierarchy_id.clone());
            }
        }
    }

    pub fn finish(self) -> HierarchyIndex {
        debug!(
            "Hierarchy index built: {} node members across {} hierarchies, {} domains",
            self.index.nodes.len(),
            self.index.children.len(),
            self.index.domain_hierarchies.len(),
        );
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetadataSnapshot;
    use crate::Sample;

    fn m(id: &str) -> MemberId {
        MemberId::new(id).unwrap()
    }

    fn h(id: &str) -> HierarchyId {
        HierarchyId::new(id).unwrap()
    }

    fn node(hierarchy: &str, member: &str, parent: Option<&str>) -> MemberHierarchyNode {
        MemberHierarchyNode {
            member_hierarchy_id: h(hierarchy),
            member_id: m(member),
            parent_member_id: parent.map(m),
            level: None,
        }
    }

    fn hierarchy(id: &str, domain: &str) -> MemberHierarchy {
        MemberHierarchy {
            member_hierarchy_id: h(id),
            domain_id: DomainId::new(domain).unwrap(),
            name: None,
        }
    }

    #[test]
    fn test_index_sample() {
        crate::init_log();

        let snapshot = MetadataSnapshot::from_yaml_str(Sample::Instruments.into()).unwrap();
        let index = HierarchyIndex::from_store(&snapshot);

        assert!(index.is_node(&m("TYP_INSTRMNT_ALL")));
        assert!(index.is_node(&m("TYP_INSTRMNT_LOANS_DEPOSITS")));
        assert!(index.is_leaf(&m("TYP_INSTRMNT_LOAN")));
        assert!(index.is_leaf(&m("CRRNCY_EUR")));
        assert_eq!(index.node_count(), 2);

        assert_eq!(
            index.children(&m("TYP_INSTRMNT_ALL"), &h("H_INSTRMNT_MAIN")),
            Some(&[m("TYP_INSTRMNT_LOANS_DEPOSITS"), m("TYP_INSTRMNT_DEBT_SEC")][..])
        );
        assert_eq!(
            index.children(&m("TYP_INSTRMNT_ALL"), &h("H_INSTRMNT_EQUITY")),
            Some(&[m("TYP_INSTRMNT_EQUITY")][..])
        );
        assert_eq!(index.children(&m("TYP_INSTRMNT_LOAN"), &h("H_INSTRMNT_MAIN")), None);

        let domain = DomainId::new("TYP_INSTRMNT").unwrap();
        assert_eq!(
            index.hierarchies_of(&domain),
            &[h("H_INSTRMNT_MAIN"), h("H_INSTRMNT_EQUITY")]
        );
        assert!(index
            .hierarchies_of(&DomainId::new("CRRNCY").unwrap())
            .is_empty());
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let nodes = vec![
            node("H", "A", None),
            node("H", "B", Some("A")),
            node("H", "C", Some("A")),
            node("H", "B", Some("A")),
        ];
        let hierarchies = vec![hierarchy("H", "D"), hierarchy("H", "D")];

        let once = HierarchyIndex::build(&nodes, &hierarchies);
        let again = HierarchyIndex::build(&nodes, &hierarchies);
        assert_eq!(once, again);

        let mut builder = HierarchyIndexBuilder::default();
        builder.scan_nodes(&nodes);
        builder.scan_nodes(&nodes);
        builder.scan_hierarchies(&hierarchies);
        builder.scan_hierarchies(&hierarchies);
        let twice = builder.finish();

        assert_eq!(once, twice);
        assert_eq!(twice.children(&m("A"), &h("H")), Some(&[m("B"), m("C")][..]));
        assert_eq!(twice.hierarchies_of(&DomainId::new("D").unwrap()), &[h("H")]);
    }

    #[test]
    fn test_member_can_be_node_and_leaf_elsewhere() {
        let nodes = vec![node("H1", "B", Some("A")), node("H2", "C", Some("B"))];
        let index = HierarchyIndex::build(&nodes, std::iter::empty());

        // Node status is global across hierarchies.
        assert!(index.is_node(&m("B")));
        assert_eq!(index.children(&m("B"), &h("H1")), None);
        assert_eq!(index.children(&m("B"), &h("H2")), Some(&[m("C")][..]));
    }
}
