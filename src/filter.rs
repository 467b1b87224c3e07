use std::collections::HashMap;

use log::{debug, trace};
use thiserror::Error;

use crate::config::{FilterConfig, FilterOrder};
use crate::expr::Expression;
use crate::model::{CubeLinkId, CubeStructureItemLink, ItemLinkId, MemberId, VariableCode};
use crate::store::{MetadataStore, NotFound};

/// One member correspondence of a link, as member codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPair {
    /// Code of the primary member.
    pub source: String,

    /// Code of the foreign member.
    pub target: String,
}

/// Member correspondences that share one foreign variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableGroup {
    pub variable: VariableCode,
    pub pairs: Vec<MemberPair>,
}

impl VariableGroup {
    /// Distinct target codes, first occurrence kept.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            if !targets.contains(&pair.target.as_str()) {
                targets.push(&pair.target);
            }
        }
        targets
    }
}

/// Per foreign variable list of `source -> target` member codes, for consumers that build
/// lookup tables instead of guards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseMemberMap {
    groups: Vec<VariableGroup>,
}

impl ReverseMemberMap {
    pub fn get(&self, variable: &str) -> Option<&[MemberPair]> {
        self.groups
            .iter()
            .find(|g| g.variable.as_str() == variable)
            .map(|g| g.pairs.as_slice())
    }

    pub fn groups(&self) -> &[VariableGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Generates guard expressions from the member links of cube structure item links.
///
/// Rows are grouped by the foreign variable of their item link. Each group becomes a
/// disjunction of equality tests on the foreign member codes, and the groups are joined
/// by conjunction. Redundant single operand wrappers are never emitted and a link without
/// member links yields `True`.
///
/// With [FilterOrder::Store] groups appear in the order their first row is met and codes
/// in row order, so the text is stable for a given store. [FilterOrder::Sorted] makes it
/// independent of the store order.
pub struct FilterBuilder<'ctx, S: MetadataStore + ?Sized> {
    store: &'ctx S,
    config: FilterConfig,
}

impl<'ctx, S: MetadataStore + ?Sized> FilterBuilder<'ctx, S> {
    pub fn new(store: &'ctx S) -> Self {
        Self::with_config(store, FilterConfig::default())
    }

    pub fn with_config(store: &'ctx S, config: FilterConfig) -> Self {
        Self { store, config }
    }

    /// Guard for one item link, rendered as code.
    pub fn build_filter(&self, link: &ItemLinkId) -> Result<String, FilterError> {
        let expr = self.build_filter_expression(link)?;
        let code = expr.to_pretty_string(&self.config.item_binding);
        debug!("Filter for {link} ({} comparisons): {code}", expr.comparison_count());
        Ok(code)
    }

    pub fn build_filter_expression(&self, link: &ItemLinkId) -> Result<Expression, FilterError> {
        let groups = self.item_link_groups(link)?;
        self.combine(link.as_str(), &groups)
    }

    pub fn reverse_member_map(&self, link: &ItemLinkId) -> Result<ReverseMemberMap, FilterError> {
        Ok(ReverseMemberMap {
            groups: self.item_link_groups(link)?,
        })
    }

    /// Guard for every item link of a cube link together, rendered as code.
    pub fn build_cube_link_filter(&self, link: &CubeLinkId) -> Result<String, FilterError> {
        let expr = self.build_cube_link_expression(link)?;
        let code = expr.to_pretty_string(&self.config.item_binding);
        debug!(
            "Filter for cube link {link} ({} comparisons): {code}",
            expr.comparison_count()
        );
        Ok(code)
    }

    pub fn build_cube_link_expression(&self, link: &CubeLinkId) -> Result<Expression, FilterError> {
        let groups = self.cube_link_groups(link)?;
        self.combine(link.as_str(), &groups)
    }

    pub fn cube_link_reverse_member_map(
        &self,
        link: &CubeLinkId,
    ) -> Result<ReverseMemberMap, FilterError> {
        Ok(ReverseMemberMap {
            groups: self.cube_link_groups(link)?,
        })
    }

    fn item_link_groups(&self, link: &ItemLinkId) -> Result<Vec<VariableGroup>, FilterError> {
        let item_link = self
            .store
            .require_item_link(link)
            .map_err(|source| FilterError::not_found(link.as_str(), source))?;
        self.group(link.as_str(), std::iter::once(item_link))
    }

    fn cube_link_groups(&self, link: &CubeLinkId) -> Result<Vec<VariableGroup>, FilterError> {
        self.store
            .require_cube_link(link)
            .map_err(|source| FilterError::not_found(link.as_str(), source))?;
        self.group(link.as_str(), self.store.item_links_of(link))
    }

    /// Collect member links of the item links into groups keyed by foreign variable.
    fn group<'a>(
        &self,
        context: &str,
        item_links: impl Iterator<Item = &'a CubeStructureItemLink>,
    ) -> Result<Vec<VariableGroup>, FilterError> {
        let mut groups: Vec<VariableGroup> = Vec::new();
        let mut by_variable: HashMap<VariableCode, usize> = HashMap::new();

        for item_link in item_links {
            let item_link_id = &item_link.cube_structure_item_link_id;
            for member_link in self.store.member_links_of(item_link_id) {
                let source = self.member_code(context, &member_link.primary_member_id)?;
                let target = self.member_code(context, &member_link.foreign_member_id)?;
                trace!("{item_link_id}: {source} -> {target}");

                let variable = &item_link.foreign_cube_variable_code;
                let i = *by_variable.entry(variable.clone()).or_insert_with(|| {
                    groups.push(VariableGroup {
                        variable: variable.clone(),
                        pairs: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[i].pairs.push(MemberPair { source, target });
            }
        }

        if self.config.order == FilterOrder::Sorted {
            groups.sort_by(|a, b| a.variable.cmp(&b.variable));
            for group in &mut groups {
                group
                    .pairs
                    .sort_by(|a, b| (&a.target, &a.source).cmp(&(&b.target, &b.source)));
            }
        }

        Ok(groups)
    }

    fn member_code(&self, context: &str, member: &MemberId) -> Result<String, FilterError> {
        self.store
            .require_member(member)
            .map(|m| m.code.clone())
            .map_err(|source| FilterError::not_found(context, source))
    }

    fn combine(&self, context: &str, groups: &[VariableGroup]) -> Result<Expression, FilterError> {
        let mut conjuncts = Vec::with_capacity(groups.len());
        for group in groups {
            let targets = group.targets();
            if let Some(max) = self.config.max_disjuncts {
                if targets.len() > max {
                    return Err(FilterError::TooManyMembers {
                        link: context.to_owned(),
                        variable: group.variable.clone(),
                        count: targets.len(),
                        max,
                    });
                }
            }

            let disjuncts = targets
                .into_iter()
                .map(|code| Expression::equals(group.variable.clone(), code))
                .collect();
            conjuncts.push(Expression::any(disjuncts));
        }
        Ok(Expression::all(conjuncts))
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Cannot build filter for link `{link}`. {source}")]
    NotFound {
        link: String,
        #[source]
        source: NotFound,
    },

    #[error(
        "Filter for link `{link}` needs {count} comparisons on `{variable}`, more than the allowed {max}"
    )]
    TooManyMembers {
        link: String,
        variable: VariableCode,
        count: usize,
        max: usize,
    },
}

impl FilterError {
    fn not_found(link: &str, source: NotFound) -> Self {
        FilterError::NotFound {
            link: link.to_owned(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Row;
    use crate::store::{EntityKind, MetadataSnapshot};
    use crate::Sample;

    fn l(id: &str) -> ItemLinkId {
        ItemLinkId::new(id).unwrap()
    }

    fn cl(id: &str) -> CubeLinkId {
        CubeLinkId::new(id).unwrap()
    }

    fn links() -> MetadataSnapshot {
        MetadataSnapshot::from_yaml_str(Sample::Links.into()).unwrap()
    }

    /// Item link `L` on foreign variable `X`, with a member link per code.
    fn single_variable(codes: &[&str]) -> MetadataSnapshot {
        let mut yaml = String::from(
            "cube_structure_item_links:\n  - { cube_structure_item_link_id: L, primary_cube_variable_code: P, foreign_cube_variable_code: X }\n",
        );
        yaml.push_str("members:\n");
        for code in codes {
            yaml.push_str(&format!(
                "  - {{ member_id: F_{code}, code: \"{code}\", domain_id: D }}\n  - {{ member_id: P_{code}, code: \"p{code}\", domain_id: D }}\n"
            ));
        }
        yaml.push_str("member_links:\n");
        for code in codes {
            yaml.push_str(&format!(
                "  - {{ cube_structure_item_link_id: L, primary_member_id: P_{code}, foreign_member_id: F_{code} }}\n"
            ));
        }
        MetadataSnapshot::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn test_single_member_is_bare_equality() {
        let store = single_variable(&["M1"]);
        let filter = FilterBuilder::new(&store).build_filter(&l("L")).unwrap();
        assert_eq!(filter, r#"(item.X == "M1")"#);
    }

    #[test]
    fn test_members_of_one_variable_are_disjunction() {
        let store = single_variable(&["M1", "M2"]);
        let filter = FilterBuilder::new(&store).build_filter(&l("L")).unwrap();
        assert_eq!(filter, r#"((item.X == "M1") or (item.X == "M2"))"#);
    }

    #[test]
    fn test_item_link_filter_from_sample() {
        crate::init_log();

        let store = links();
        let builder = FilterBuilder::new(&store);

        assert_eq!(
            builder.build_filter(&l("LINK_INSTRMNT")).unwrap(),
            r#"((item.TYP_INSTRMNT == "LOAN") or (item.TYP_INSTRMNT == "DEPOSIT"))"#
        );
        assert_eq!(
            builder.build_filter(&l("LINK_CRRNCY")).unwrap(),
            r#"(item.CRRNCY == "EUR")"#
        );
    }

    #[test]
    fn test_no_member_links_is_true() {
        let store = links();
        let builder = FilterBuilder::new(&store);
        assert_eq!(builder.build_filter(&l("LINK_EMPTY")).unwrap(), "True");
        assert!(builder.reverse_member_map(&l("LINK_EMPTY")).unwrap().is_empty());
    }

    #[test]
    fn test_cube_link_is_conjunction() {
        let store = links();
        let builder = FilterBuilder::new(&store);

        let code = builder.build_cube_link_filter(&cl("IL_INSTRMNT_TO_F_05")).unwrap();
        assert_eq!(
            code,
            r#"(((item.TYP_INSTRMNT == "LOAN") or (item.TYP_INSTRMNT == "DEPOSIT")) and (item.CRRNCY == "EUR"))"#
        );

        let expr = Expression::parse(&code, "item").unwrap();
        assert_eq!(
            expr,
            builder
                .build_cube_link_expression(&cl("IL_INSTRMNT_TO_F_05"))
                .unwrap()
        );

        let row: HashMap<&str, &str> = [("TYP_INSTRMNT", "DEPOSIT"), ("CRRNCY", "EUR")]
            .into_iter()
            .collect();
        assert_eq!(row.value("CRRNCY"), Some("EUR"));
        assert!(expr.evaluate(&row));
    }

    #[test]
    fn test_sorted_order() {
        let store = links();
        let config = FilterConfig {
            order: FilterOrder::Sorted,
            item_binding: "row".to_owned(),
            ..FilterConfig::default()
        };
        let builder = FilterBuilder::with_config(&store, config);

        assert_eq!(
            builder.build_cube_link_filter(&cl("IL_INSTRMNT_TO_F_05")).unwrap(),
            r#"((row.CRRNCY == "EUR") and ((row.TYP_INSTRMNT == "DEPOSIT") or (row.TYP_INSTRMNT == "LOAN")))"#
        );
    }

    #[test]
    fn test_reverse_member_map() {
        let store = links();
        let builder = FilterBuilder::new(&store);

        let map = builder.reverse_member_map(&l("LINK_INSTRMNT")).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("TYP_INSTRMNT").unwrap(),
            &[
                MemberPair {
                    source: "1".to_owned(),
                    target: "LOAN".to_owned(),
                },
                MemberPair {
                    source: "2".to_owned(),
                    target: "DEPOSIT".to_owned(),
                },
            ]
        );
        assert!(map.get("INSTRMNT_TYP").is_none());

        let map = builder
            .cube_link_reverse_member_map(&cl("IL_INSTRMNT_TO_F_05"))
            .unwrap();
        let variables: Vec<&str> = map.groups().iter().map(|g| g.variable.as_str()).collect();
        assert_eq!(variables, ["TYP_INSTRMNT", "CRRNCY"]);
        assert_eq!(map.get("CRRNCY").unwrap()[0].source, "978");
    }

    #[test]
    fn test_repeated_codes_compared_once() {
        let yaml = r#"
members:
  - { member_id: F_M1, code: M1, domain_id: D }
  - { member_id: P_A, code: A, domain_id: D }
  - { member_id: P_B, code: B, domain_id: D }
cube_structure_item_links:
  - { cube_structure_item_link_id: L, primary_cube_variable_code: P, foreign_cube_variable_code: X }
member_links:
  - { cube_structure_item_link_id: L, primary_member_id: P_A, foreign_member_id: F_M1 }
  - { cube_structure_item_link_id: L, primary_member_id: P_B, foreign_member_id: F_M1 }
"#;
        let store = MetadataSnapshot::from_yaml_str(yaml).unwrap();
        let builder = FilterBuilder::new(&store);

        assert_eq!(builder.build_filter(&l("L")).unwrap(), r#"(item.X == "M1")"#);

        let map = builder.reverse_member_map(&l("L")).unwrap();
        let sources: Vec<&str> = map.get("X").unwrap().iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, ["A", "B"]);
    }

    #[test]
    fn test_unknown_link_is_not_found() {
        let store = links();
        let builder = FilterBuilder::new(&store);

        let err = builder.build_filter(&l("LINK_MISSING")).unwrap_err();
        let FilterError::NotFound { link, source } = &err else {
            panic!("expected NotFound, got {err:?}");
        };
        assert_eq!(link, "LINK_MISSING");
        assert_eq!(source.kind, EntityKind::CubeStructureItemLink);
        assert!(err.to_string().contains("LINK_MISSING"));

        let err = builder.build_cube_link_filter(&cl("NOPE")).unwrap_err();
        assert!(matches!(
            err,
            FilterError::NotFound { source: NotFound { kind: EntityKind::CubeLink, .. }, .. }
        ));
    }

    #[test]
    fn test_dangling_member_is_not_found() {
        let yaml = r#"
cube_structure_item_links:
  - { cube_structure_item_link_id: L, primary_cube_variable_code: P, foreign_cube_variable_code: X }
member_links:
  - { cube_structure_item_link_id: L, primary_member_id: GHOST, foreign_member_id: GHOST }
"#;
        let store = MetadataSnapshot::from_yaml_str(yaml).unwrap();
        let err = FilterBuilder::new(&store).build_filter(&l("L")).unwrap_err();
        let FilterError::NotFound { link, source } = err else {
            panic!("expected NotFound, got {err:?}");
        };
        assert_eq!(link, "L");
        assert_eq!(source, NotFound::new(EntityKind::Member, "GHOST"));
    }

    #[test]
    fn test_disjunct_cap() {
        let store = single_variable(&["M1", "M2", "M3"]);
        let config = FilterConfig {
            max_disjuncts: Some(2),
            ..FilterConfig::default()
        };
        let err = FilterBuilder::with_config(&store, config)
            .build_filter(&l("L"))
            .unwrap_err();
        assert!(matches!(
            err,
            FilterError::TooManyMembers { count: 3, max: 2, .. }
        ));
    }
}
