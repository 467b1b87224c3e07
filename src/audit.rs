//! Referential integrity check of a metadata store.
//!
//! Resolution and filter building tolerate dangling references, treating them as absent
//! relationships. This module reports them instead, so that a broken export can be noticed
//! before the generated artifacts silently lose members.

use std::collections::HashSet;

use log::{debug, warn};

use crate::model::*;
use crate::store::MetadataStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Hierarchy refers to a domain that does not exist.
    UnknownHierarchyDomain {
        hierarchy: HierarchyId,
        domain: DomainId,
    },

    /// Hierarchy nodes belong to a hierarchy that does not exist.
    UnknownNodeHierarchy { hierarchy: HierarchyId },

    /// Hierarchy node mentions a member that does not exist, as child or as parent.
    UnknownNodeMember {
        hierarchy: HierarchyId,
        member: MemberId,
    },

    /// Hierarchy node mentions a member of another domain than the hierarchy's.
    ForeignDomainMember {
        hierarchy: HierarchyId,
        member: MemberId,
        expected: DomainId,
        found: DomainId,
    },

    /// Member link mentions a member that does not exist.
    UnknownLinkMember {
        item_link: ItemLinkId,
        member: MemberId,
    },

    /// Member link instantiates an item link that does not exist.
    UnknownItemLink { item_link: ItemLinkId },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use IntegrityIssue::*;

        match self {
            UnknownHierarchyDomain { hierarchy, domain } => {
                write!(f, "hierarchy `{hierarchy}` refers to unknown domain `{domain}`")
            }
            UnknownNodeHierarchy { hierarchy } => {
                write!(f, "nodes belong to unknown hierarchy `{hierarchy}`")
            }
            UnknownNodeMember { hierarchy, member } => {
                write!(f, "hierarchy `{hierarchy}` mentions unknown member `{member}`")
            }
            ForeignDomainMember {
                hierarchy,
                member,
                expected,
                found,
            } => write!(
                f,
                "hierarchy `{hierarchy}` of domain `{expected}` mentions member `{member}` of domain `{found}`"
            ),
            UnknownLinkMember { item_link, member } => {
                write!(f, "member link of `{item_link}` mentions unknown member `{member}`")
            }
            UnknownItemLink { item_link } => {
                write!(f, "member link refers to unknown item link `{item_link}`")
            }
        }
    }
}

/// Collect every dangling or inconsistent reference of `store`, in store order.
///
/// A missing hierarchy, or a member mentioned by several nodes of the same hierarchy, is
/// reported once.
pub fn audit<S: MetadataStore + ?Sized>(store: &S) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();

    for hierarchy in store.hierarchies() {
        if store.domain(&hierarchy.domain_id).is_none() {
            issues.push(IntegrityIssue::UnknownHierarchyDomain {
                hierarchy: hierarchy.member_hierarchy_id.clone(),
                domain: hierarchy.domain_id.clone(),
            });
        }
    }

    let mut missing_hierarchies: HashSet<&HierarchyId> = HashSet::new();
    let mut reported: HashSet<(&HierarchyId, &MemberId)> = HashSet::new();
    for node in store.hierarchy_nodes() {
        let hierarchy_id = &node.member_hierarchy_id;
        let hierarchy = store.hierarchy(hierarchy_id);
        if hierarchy.is_none() && missing_hierarchies.insert(hierarchy_id) {
            issues.push(IntegrityIssue::UnknownNodeHierarchy {
                hierarchy: hierarchy_id.clone(),
            });
        }

        let mentioned = std::iter::once(&node.member_id).chain(node.parent_member_id.as_ref());
        for member_id in mentioned {
            if !reported.insert((hierarchy_id, member_id)) {
                continue;
            }
            match store.member(member_id) {
                None => issues.push(IntegrityIssue::UnknownNodeMember {
                    hierarchy: hierarchy_id.clone(),
                    member: member_id.clone(),
                }),
                Some(member) => {
                    if let Some(h) = hierarchy.filter(|h| h.domain_id != member.domain_id) {
                        issues.push(IntegrityIssue::ForeignDomainMember {
                            hierarchy: hierarchy_id.clone(),
                            member: member_id.clone(),
                            expected: h.domain_id.clone(),
                            found: member.domain_id.clone(),
                        });
                    }
                }
            }
        }
    }

    let mut reported: HashSet<&ItemLinkId> = HashSet::new();
    for link in store.member_links() {
        let item_link = &link.cube_structure_item_link_id;
        if store.item_link(item_link).is_none() && reported.insert(item_link) {
            issues.push(IntegrityIssue::UnknownItemLink {
                item_link: item_link.clone(),
            });
        }
        for member_id in [&link.primary_member_id, &link.foreign_member_id] {
            if store.member(member_id).is_none() {
                issues.push(IntegrityIssue::UnknownLinkMember {
                    item_link: item_link.clone(),
                    member: member_id.clone(),
                });
            }
        }
    }

    for issue in &issues {
        warn!("Integrity: {issue}");
    }
    debug!("Integrity audit found {} issues", issues.len());
    issues
}
