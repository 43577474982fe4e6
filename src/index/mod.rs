//! Index layer
//! - mod.rs: Index contract and occurrence types
//! - memory.rs: In-memory index, optionally loaded from a JSON snapshot

pub mod memory;

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::SymbolKind;

pub use memory::MemoryIndex;

/// Bitmask of the roles an occurrence plays. Relation roles share the mask
/// with occurrence roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolRole(u64);

impl SymbolRole {
    pub const DECLARATION: Self = Self(1 << 0);
    pub const DEFINITION: Self = Self(1 << 1);
    pub const REFERENCE: Self = Self(1 << 2);
    pub const READ: Self = Self(1 << 3);
    pub const WRITE: Self = Self(1 << 4);
    pub const CALL: Self = Self(1 << 5);
    pub const DYNAMIC: Self = Self(1 << 6);
    pub const ADDRESS_OF: Self = Self(1 << 7);
    pub const IMPLICIT: Self = Self(1 << 8);

    pub const CHILD_OF: Self = Self(1 << 9);
    pub const BASE_OF: Self = Self(1 << 10);
    pub const OVERRIDE_OF: Self = Self(1 << 11);
    pub const RECEIVED_BY: Self = Self(1 << 12);
    pub const CALLED_BY: Self = Self(1 << 13);
    pub const EXTENDED_BY: Self = Self(1 << 14);
    pub const ACCESSOR_OF: Self = Self(1 << 15);
    pub const CONTAINED_BY: Self = Self(1 << 16);

    /// True when every role in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one role in `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for SymbolRole {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SymbolRole {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexSymbolKind {
    Unknown,
    Module,
    Namespace,
    Enum,
    Struct,
    Class,
    Protocol,
    Extension,
    Union,
    TypeAlias,
    Function,
    Variable,
    Field,
    EnumConstant,
    InstanceMethod,
    ClassMethod,
    StaticMethod,
    InstanceProperty,
    ClassProperty,
    StaticProperty,
    Constructor,
    Destructor,
    ConversionFunction,
    Parameter,
    Using,
}

impl IndexSymbolKind {
    pub fn to_lsp(self) -> SymbolKind {
        match self {
            IndexSymbolKind::Class => SymbolKind::CLASS,
            IndexSymbolKind::ClassMethod
            | IndexSymbolKind::InstanceMethod
            | IndexSymbolKind::StaticMethod => SymbolKind::METHOD,
            IndexSymbolKind::InstanceProperty
            | IndexSymbolKind::StaticProperty
            | IndexSymbolKind::ClassProperty => SymbolKind::PROPERTY,
            IndexSymbolKind::Enum => SymbolKind::ENUM,
            IndexSymbolKind::EnumConstant => SymbolKind::ENUM_MEMBER,
            IndexSymbolKind::Protocol => SymbolKind::INTERFACE,
            IndexSymbolKind::Function | IndexSymbolKind::ConversionFunction => {
                SymbolKind::FUNCTION
            }
            IndexSymbolKind::Variable => SymbolKind::VARIABLE,
            IndexSymbolKind::Struct => SymbolKind::STRUCT,
            IndexSymbolKind::Parameter => SymbolKind::TYPE_PARAMETER,
            _ => SymbolKind::NULL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSymbol {
    pub usr: String,
    pub name: String,
    pub kind: IndexSymbolKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolLocation {
    pub path: String,
    /// Set for locations outside the user's project (SDKs, system headers).
    #[serde(default)]
    pub is_system: bool,
    /// 1-based.
    pub line: u32,
    /// 1-based, in UTF-8 bytes.
    pub utf8_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRelation {
    pub roles: SymbolRole,
    pub symbol: IndexSymbol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolOccurrence {
    pub symbol: IndexSymbol,
    pub location: SymbolLocation,
    pub roles: SymbolRole,
    #[serde(default)]
    pub relations: Vec<SymbolRelation>,
}

impl SymbolOccurrence {
    /// Name of the enclosing symbol, taken from the first child-of relation.
    pub fn container_name(&self) -> Option<&str> {
        self.relations
            .iter()
            .find(|relation| relation.roles.contains(SymbolRole::CHILD_OF))
            .map(|relation| relation.symbol.name.as_str())
    }
}

/// How a name pattern is matched against symbol names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameMatch {
    pub anchor_start: bool,
    pub anchor_end: bool,
    /// Pattern characters may be spread out in order rather than contiguous.
    pub subsequence: bool,
    pub ignore_case: bool,
}

impl NameMatch {
    pub fn matches(&self, name: &str, pattern: &str) -> bool {
        let (name, pattern) = if self.ignore_case {
            (name.to_lowercase(), pattern.to_lowercase())
        } else {
            (name.to_string(), pattern.to_string())
        };

        if self.subsequence {
            return self.matches_subsequence(&name, &pattern);
        }

        match (self.anchor_start, self.anchor_end) {
            (true, true) => name == pattern,
            (true, false) => name.starts_with(&pattern),
            (false, true) => name.ends_with(&pattern),
            (false, false) => name.contains(&pattern),
        }
    }

    fn matches_subsequence(&self, name: &str, pattern: &str) -> bool {
        let mut name_chars = name.chars().peekable();
        let mut pattern_chars = pattern.chars().peekable();

        if self.anchor_start {
            match (name_chars.peek(), pattern_chars.peek()) {
                (_, None) => {}
                (Some(n), Some(p)) if n == p => {}
                _ => return false,
            }
        }
        if self.anchor_end && !pattern.is_empty() && name.chars().last() != pattern.chars().last() {
            return false;
        }

        let mut pending = pattern_chars.next();
        for c in name_chars {
            match pending {
                Some(p) if p == c => pending = pattern_chars.next(),
                Some(_) => {}
                None => break,
            }
        }
        pending.is_none()
    }
}

/// Read-mostly persistent symbol index, queried concurrently.
pub trait SymbolIndex: Send + Sync {
    /// One canonical occurrence per symbol whose name matches `pattern`.
    fn canonical_occurrences_matching(&self, pattern: &str, matching: NameMatch)
    -> Vec<SymbolOccurrence>;

    /// Occurrences of `usr` that play any of `roles`.
    fn occurrences_of_usr(&self, usr: &str, roles: SymbolRole) -> Vec<SymbolOccurrence>;

    /// Occurrences holding a relation to `usr` with any of `roles`.
    fn occurrences_related_to_usr(&self, usr: &str, roles: SymbolRole) -> Vec<SymbolOccurrence>;

    /// Blocks until pending unit changes are visible to queries.
    fn poll_for_unit_changes_and_wait(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(NameMatch::default(), "FooBar", "oBa", true)]
    #[case(NameMatch::default(), "FooBar", "foo", false)]
    #[case(NameMatch { ignore_case: true, ..Default::default() }, "FooBar", "foo", true)]
    #[case(NameMatch { anchor_start: true, ..Default::default() }, "FooBar", "Bar", false)]
    #[case(NameMatch { anchor_end: true, ..Default::default() }, "FooBar", "Bar", true)]
    #[case(NameMatch { anchor_start: true, anchor_end: true, ..Default::default() }, "Foo", "Foo", true)]
    #[case(NameMatch { subsequence: true, ..Default::default() }, "FooBar", "FBr", true)]
    #[case(NameMatch { subsequence: true, ..Default::default() }, "FooBar", "rF", false)]
    #[case(NameMatch { subsequence: true, anchor_start: true, ..Default::default() }, "FooBar", "oBr", false)]
    fn name_match_honours_flags(
        #[case] matching: NameMatch,
        #[case] name: &str,
        #[case] pattern: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(matching.matches(name, pattern), expected);
    }

    #[test]
    fn role_set_operations() {
        let roles = SymbolRole::REFERENCE | SymbolRole::CALL;

        assert!(roles.contains(SymbolRole::REFERENCE));
        assert!(!roles.contains(SymbolRole::REFERENCE | SymbolRole::DEFINITION));
        assert!(roles.intersects(SymbolRole::DEFINITION | SymbolRole::CALL));
        assert!(!SymbolRole::default().intersects(roles));
    }

    #[test]
    fn container_name_uses_child_of_relation() {
        let parent = IndexSymbol {
            usr: "s:3Foo".to_string(),
            name: "Foo".to_string(),
            kind: IndexSymbolKind::Struct,
        };
        let occurrence = SymbolOccurrence {
            symbol: IndexSymbol {
                usr: "s:3Foo3barSivp".to_string(),
                name: "bar".to_string(),
                kind: IndexSymbolKind::InstanceProperty,
            },
            location: SymbolLocation {
                path: "/a.swift".to_string(),
                is_system: false,
                line: 2,
                utf8_column: 7,
            },
            roles: SymbolRole::DEFINITION | SymbolRole::CHILD_OF,
            relations: vec![
                SymbolRelation {
                    roles: SymbolRole::CALLED_BY,
                    symbol: parent.clone(),
                },
                SymbolRelation {
                    roles: SymbolRole::CHILD_OF,
                    symbol: parent,
                },
            ],
        };

        assert_eq!(occurrence.container_name(), Some("Foo"));
    }
}
