use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::config::HierarchyScope;
use crate::hierarchy::HierarchyIndex;
use crate::model::{HierarchyId, MemberId};
use crate::store::MetadataStore;

type CacheKey = (Option<MemberId>, Option<HierarchyId>);

/// Expands members into the concrete (leaf) members they stand for.
///
/// Results are memoized per `(member, hierarchy)` for the lifetime of the resolver. There is
/// no invalidation: a resolver must be dropped together with the [HierarchyIndex] it borrows.
/// The cache uses interior mutability and is therefore bound to one thread, like the
/// processing context that owns it.
pub struct MemberSetResolver<'ctx, S: MetadataStore + ?Sized> {
    store: &'ctx S,
    index: &'ctx HierarchyIndex,
    scope: HierarchyScope,
    cache: RefCell<HashMap<CacheKey, Vec<MemberId>>>,
}

impl<'ctx, S: MetadataStore + ?Sized> MemberSetResolver<'ctx, S> {
    pub fn new(store: &'ctx S, index: &'ctx HierarchyIndex) -> Self {
        Self::with_scope(store, index, HierarchyScope::default())
    }

    pub fn with_scope(store: &'ctx S, index: &'ctx HierarchyIndex, scope: HierarchyScope) -> Self {
        Self {
            store,
            index,
            scope,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Concrete members represented by `member`, without duplicates.
    ///
    /// A leaf resolves to itself. A node resolves to the leaves below it, collected
    /// depth-first through the hierarchies selected by the [HierarchyScope], hierarchies in
    /// domain registration order and children in index order. The node members passed on the
    /// way are never part of the result. An absent member resolves to nothing.
    ///
    /// Every call returns its own copy of the cached list.
    pub fn resolve(
        &self,
        member: Option<&MemberId>,
        hierarchy: Option<&HierarchyId>,
    ) -> Vec<MemberId> {
        let key = (member.cloned(), hierarchy.cloned());
        if let Some(hit) = self.cache.borrow().get(&key) {
            trace!("Member set cache hit for {key:?}");
            return hit.clone();
        }

        let resolved = match member {
            Some(member) => self.expand(member, hierarchy),
            None => Vec::new(),
        };
        debug!("Resolved {key:?} into {} members", resolved.len());

        self.cache.borrow_mut().insert(key, resolved.clone());
        resolved
    }

    /// Codes of the members [resolve](Self::resolve) returns. Members unknown to the store
    /// are skipped.
    pub fn resolve_codes(
        &self,
        member: Option<&MemberId>,
        hierarchy: Option<&HierarchyId>,
    ) -> Vec<String> {
        self.resolve(member, hierarchy)
            .iter()
            .filter_map(|id| self.store.member(id))
            .map(|m| m.code.clone())
            .collect()
    }

    /// Number of memoized `(member, hierarchy)` entries.
    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    fn expand(&self, member: &MemberId, hierarchy: Option<&HierarchyId>) -> Vec<MemberId> {
        let mut out = Expansion::default();
        if self.index.is_leaf(member) {
            out.push(member);
        }

        let hierarchies = match (self.scope, hierarchy) {
            (HierarchyScope::Named, Some(hierarchy)) => std::slice::from_ref(hierarchy),
            _ => self
                .store
                .member(member)
                .map(|m| self.index.hierarchies_of(&m.domain_id))
                .unwrap_or_default(),
        };

        for hierarchy in hierarchies {
            trace!("Expand {member} through {hierarchy}");
            let mut seen = HashSet::from([member.clone()]);
            self.descend(member, hierarchy, &mut seen, &mut out);
        }

        out.members
    }

    fn descend(
        &self,
        parent: &MemberId,
        hierarchy: &HierarchyId,
        seen: &mut HashSet<MemberId>,
        out: &mut Expansion,
    ) {
        let Some(children) = self.index.children(parent, hierarchy) else {
            return;
        };

        for child in children {
            if !seen.insert(child.clone()) {
                trace!("{child} already visited in {hierarchy}");
                continue;
            }
            if self.index.is_leaf(child) {
                out.push(child);
            }
            self.descend(child, hierarchy, seen, out);
        }
    }
}

/// Ordered, duplicate free accumulator of resolved members.
#[derive(Default)]
struct Expansion {
    members: Vec<MemberId>,
    present: HashSet<MemberId>,
}

impl Expansion {
    fn push(&mut self, member: &MemberId) {
        if self.present.insert(member.clone()) {
            self.members.push(member.clone());
        }
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

    fn ms(ids: &[&str]) -> Vec<MemberId> {
        ids.iter().map(|id| m(id)).collect()
    }

    /// Domain `D` with the single hierarchy `H` built from `edges` as `(parent, child)`.
    fn snapshot(members: &[&str], edges: &[(&str, &str)]) -> MetadataSnapshot {
        let mut yaml = String::from("domains: [{ domain_id: D }]\n");
        yaml.push_str("member_hierarchies: [{ member_hierarchy_id: H, domain_id: D }]\n");
        yaml.push_str("members:\n");
        for id in members {
            yaml.push_str(&format!("  - {{ member_id: {id}, code: {id}, domain_id: D }}\n"));
        }
        yaml.push_str("member_hierarchy_nodes:\n");
        for (parent, child) in edges {
            yaml.push_str(&format!(
                "  - {{ member_hierarchy_id: H, member_id: {child}, parent_member_id: {parent} }}\n"
            ));
        }
        MetadataSnapshot::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn test_leaf_resolves_to_itself() {
        let snapshot = MetadataSnapshot::from_yaml_str(Sample::Instruments.into()).unwrap();
        let index = HierarchyIndex::from_store(&snapshot);
        let resolver = MemberSetResolver::new(&snapshot, &index);

        let loan = m("TYP_INSTRMNT_LOAN");
        assert_eq!(resolver.resolve(Some(&loan), None), [loan.clone()]);
        assert_eq!(
            resolver.resolve(Some(&loan), Some(&h("H_INSTRMNT_MAIN"))),
            [loan.clone()]
        );
        assert_eq!(
            resolver.resolve(Some(&m("CRRNCY_EUR")), Some(&h("H_INSTRMNT_EQUITY"))),
            ms(&["CRRNCY_EUR"])
        );
    }

    #[test]
    fn test_node_expands_to_leaves() {
        crate::init_log();

        let snapshot = snapshot(
            &["A", "B", "C", "D", "E"],
            &[("A", "B"), ("A", "C"), ("B", "D"), ("B", "E")],
        );
        let index = HierarchyIndex::from_store(&snapshot);
        let resolver = MemberSetResolver::new(&snapshot, &index);

        let resolved = resolver.resolve(Some(&m("A")), Some(&h("H")));
        assert_eq!(resolved, ms(&["D", "E", "C"]));

        assert_eq!(resolver.resolve(Some(&m("B")), None), ms(&["D", "E"]));
    }

    #[test]
    fn test_cycle_terminates() {
        let snapshot = snapshot(&["A", "B", "C"], &[("A", "B"), ("B", "A"), ("B", "C")]);
        let index = HierarchyIndex::from_store(&snapshot);
        let resolver = MemberSetResolver::new(&snapshot, &index);

        assert_eq!(resolver.resolve(Some(&m("A")), Some(&h("H"))), ms(&["C"]));
        assert_eq!(resolver.resolve(Some(&m("B")), Some(&h("H"))), ms(&["C"]));
    }

    #[test]
    fn test_shared_child_listed_once() {
        let snapshot = snapshot(
            &["A", "B", "C", "X"],
            &[("A", "B"), ("A", "C"), ("B", "X"), ("C", "X")],
        );
        let index = HierarchyIndex::from_store(&snapshot);
        let resolver = MemberSetResolver::new(&snapshot, &index);

        assert_eq!(resolver.resolve(Some(&m("A")), None), ms(&["X"]));
    }

    #[test]
    fn test_absent_member_is_empty() {
        let snapshot = MetadataSnapshot::default();
        let index = HierarchyIndex::default();
        let resolver = MemberSetResolver::new(&snapshot, &index);

        assert!(resolver.resolve(None, None).is_empty());
        assert!(resolver.resolve(None, Some(&h("H"))).is_empty());
        assert_eq!(resolver.cached_len(), 2);
    }

    #[test]
    fn test_cached_results_are_independent() {
        let snapshot = snapshot(&["A", "B", "C"], &[("A", "B"), ("A", "C")]);
        let index = HierarchyIndex::from_store(&snapshot);
        let resolver = MemberSetResolver::new(&snapshot, &index);

        let a = m("A");
        let hh = h("H");
        let mut first = resolver.resolve(Some(&a), Some(&hh));
        first.clear();
        first.push(m("Z"));

        let second = resolver.resolve(Some(&a), Some(&hh));
        assert_eq!(second, ms(&["B", "C"]));
        assert_eq!(resolver.resolve(Some(&a), Some(&hh)), second);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[test]
    fn test_domain_scope_crosses_hierarchies() {
        let snapshot = MetadataSnapshot::from_yaml_str(Sample::Instruments.into()).unwrap();
        let index = HierarchyIndex::from_store(&snapshot);
        let all = m("TYP_INSTRMNT_ALL");
        let main = h("H_INSTRMNT_MAIN");

        let resolver = MemberSetResolver::new(&snapshot, &index);
        assert_eq!(
            resolver.resolve_codes(Some(&all), Some(&main)),
            ["LOAN", "DEPOSIT", "DEBT_SEC", "EQUITY"]
        );

        let named = MemberSetResolver::with_scope(&snapshot, &index, HierarchyScope::Named);
        assert_eq!(
            named.resolve_codes(Some(&all), Some(&main)),
            ["LOAN", "DEPOSIT", "DEBT_SEC"]
        );
        assert_eq!(
            named.resolve_codes(Some(&all), None),
            ["LOAN", "DEPOSIT", "DEBT_SEC", "EQUITY"]
        );
    }
}
