//! MF-016: Mapping document types (`mapforge.yaml`).
//!
//! The declarative subset of the type-map graph: catalog types, member rules
//! that name source paths, path maps, constructor parameters, mixins and
//! derived pairs. Functions, conditions and converters are code-only.

use super::config::MapperOptions;
use super::types::{Literal, TypeInfo};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Top-level mapping document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDocument {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Document name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub options: MapperOptions,

    /// Catalog types, keyed by type name
    #[serde(default)]
    pub types: IndexMap<String, TypeInfo>,

    #[serde(default)]
    pub type_maps: Vec<TypeMapDecl>,
}

/// A source/destination type name pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairDecl {
    pub source: String,
    pub destination: String,
}

/// One type map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMapDecl {
    pub source: String,
    pub destination: String,

    /// Pair destination members with same-named source members
    #[serde(default = "default_true")]
    pub auto_members: bool,

    /// Explicit member rules, keyed by destination member name
    #[serde(default)]
    pub members: IndexMap<String, MemberRule>,

    #[serde(default)]
    pub paths: Vec<PathRule>,

    /// Constructor arguments; derived from the destination's constructor when absent
    #[serde(default)]
    pub constructor: Option<Vec<ParameterRule>>,

    #[serde(default)]
    pub include_members: Vec<IncludeRule>,

    #[serde(default)]
    pub include_derived: Vec<PairDecl>,

    #[serde(default)]
    pub preserve_references: bool,

    /// 0 = unbounded
    #[serde(default)]
    pub max_depth: usize,

    #[serde(default)]
    pub null_substitute: Option<Literal>,
}

impl TypeMapDecl {
    pub fn pair(&self) -> PairDecl {
        PairDecl {
            source: self.source.clone(),
            destination: self.destination.clone(),
        }
    }
}

/// Resolution rule for one destination member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberRule {
    /// Source member chain; defaults to the destination member name
    #[serde(default)]
    pub from: Option<Vec<String>>,

    /// Name of an included member the chain starts from
    #[serde(default)]
    pub include: Option<String>,

    #[serde(default)]
    pub ignore: bool,

    #[serde(default)]
    pub inline: Option<bool>,

    #[serde(default)]
    pub null_substitute: Option<Literal>,

    #[serde(default)]
    pub use_destination_value: bool,

    #[serde(default)]
    pub allow_null: Option<bool>,

    #[serde(default)]
    pub order: Option<i32>,
}

/// A member reached through intermediate destination members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    pub path: Vec<String>,

    #[serde(flatten)]
    pub rule: MemberRule,
}

/// One constructor argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRule {
    pub name: String,

    #[serde(flatten)]
    pub rule: MemberRule,

    #[serde(default)]
    pub default: Option<Literal>,
}

/// A mixin source merged into the owning type map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeRule {
    pub name: String,
    pub from: Vec<String>,
}

fn default_true() -> bool {
    true
}
