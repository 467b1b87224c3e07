use lazy_regex::regex_is_match;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} identifier: `{value}`")]
pub struct InvalidId {
    kind: &'static str,
    value: String,
}

impl InvalidId {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Declare an identifier newtype. Identifiers are non-empty and contain no whitespace,
/// which is all that the SDD exports guarantee about them.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
        #[serde(try_from = "String")]
        #[repr(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, InvalidId> {
                let id = id.into();
                if regex_is_match!(r"^\S+$", &id) {
                    Ok(Self(id))
                } else {
                    Err(InvalidId {
                        kind: $kind,
                        value: id,
                    })
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = InvalidId;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Identifier of a [Domain].
    DomainId,
    "domain"
);
id_type!(
    /// Identifier of a [Member].
    MemberId,
    "member"
);
id_type!(
    /// Identifier of a [MemberHierarchy].
    HierarchyId,
    "member hierarchy"
);
id_type!(
    /// Identifier of a cube (structure).
    CubeId,
    "cube"
);
id_type!(
    /// Identifier of a [CubeLink].
    CubeLinkId,
    "cube link"
);
id_type!(
    /// Identifier of a [CubeStructureItemLink].
    ItemLinkId,
    "cube structure item link"
);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid variable code: `{0}`. Variable codes must be identifiers")]
pub struct InvalidVariableCode(String);

/// Code of a cube structure item (variable). Variable codes are emitted verbatim as
/// attribute names in generated filter expressions, so they must be plain identifiers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
#[repr(transparent)]
pub struct VariableCode(String);

impl VariableCode {
    pub fn new(code: impl Into<String>) -> Result<Self, InvalidVariableCode> {
        let code = code.into();
        if regex_is_match!(r"^[a-zA-Z_][a-zA-Z0-9_]*$", &code) {
            Ok(Self(code))
        } else {
            Err(InvalidVariableCode(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VariableCode {
    type Error = InvalidVariableCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for VariableCode {
    type Error = InvalidVariableCode;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl std::ops::Deref for VariableCode {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::borrow::Borrow<str> for VariableCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VariableCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for VariableCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A value space, such as "instrument type".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Domain {
    pub domain_id: DomainId,

    #[serde(default)]
    pub name: Option<String>,
}

/// One value within a [Domain]. Whether it is concrete or abstract is not a property of the
/// record itself but of the hierarchies that mention it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub code: String,
    pub domain_id: DomainId,

    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberHierarchy {
    pub member_hierarchy_id: HierarchyId,
    pub domain_id: DomainId,

    #[serde(default)]
    pub name: Option<String>,
}

/// One parent to child edge of a [MemberHierarchy]. A node without a parent is a root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberHierarchyNode {
    pub member_hierarchy_id: HierarchyId,
    pub member_id: MemberId,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent_member_id: Option<MemberId>,

    #[serde(default)]
    pub level: Option<u32>,
}

/// Link between two cubes. Groups the item links that together describe a join.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CubeLink {
    pub cube_link_id: CubeLinkId,
    pub primary_cube_id: CubeId,
    pub foreign_cube_id: CubeId,
}

/// Declares that a variable of the primary cube structure corresponds to a variable of the
/// foreign one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CubeStructureItemLink {
    pub cube_structure_item_link_id: ItemLinkId,

    #[serde(default)]
    pub cube_link_id: Option<CubeLinkId>,

    pub primary_cube_variable_code: VariableCode,
    pub foreign_cube_variable_code: VariableCode,
}

/// A concrete pair of members that instantiates a [CubeStructureItemLink].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberLink {
    pub cube_structure_item_link_id: ItemLinkId,
    pub primary_member_id: MemberId,
    pub foreign_member_id: MemberId,
}

/// Exports write roots with an empty parent column instead of leaving it out.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<MemberId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => MemberId::new(s).map(Some).map_err(serde::de::Error::custom),
    }
}
