//! MF-001: Type keys, type pairs, and the type catalog.
//!
//! The catalog is the metadata provider consulted by the plan compiler: type
//! kinds, member read/write capabilities, and constructor parameter lists.
//! Type keys carry two suffix conventions: `T?` is the nullable form of `T`
//! and `T[]` is an array of `T`.

use super::error::{MapError, MapResult};
use super::value::{ObjectRef, Record, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Type keys
// ============================================================================

/// Name of a type known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(Arc<str>);

impl TypeKey {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `T?` keys.
    pub fn is_nullable(&self) -> bool {
        self.0.ends_with('?')
    }

    /// True for `T[]` keys.
    pub fn is_array(&self) -> bool {
        self.underlying().0.ends_with("[]")
    }

    /// The nullable form of this key (`T` → `T?`). Idempotent.
    pub fn nullable(&self) -> Self {
        if self.is_nullable() {
            self.clone()
        } else {
            Self::new(&format!("{}?", self.0))
        }
    }

    /// Strip the nullable marker (`T?` → `T`).
    pub fn underlying(&self) -> Self {
        match self.0.strip_suffix('?') {
            Some(inner) => Self::new(inner),
            None => self.clone(),
        }
    }

    /// Element type of an array key (`T[]` → `T`).
    pub fn element(&self) -> Option<Self> {
        self.underlying().0.strip_suffix("[]").map(Self::new)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TypeKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// A (source type, destination type) pair, the key of a type map and of its plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypePair {
    pub source: TypeKey,
    pub destination: TypeKey,
}

impl TypePair {
    pub fn new(source: impl Into<TypeKey>, destination: impl Into<TypeKey>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// The pair with nullable markers stripped on both sides.
    pub fn underlying(&self) -> Self {
        Self {
            source: self.source.underlying(),
            destination: self.destination.underlying(),
        }
    }

    /// Element pair when both sides are arrays.
    pub fn elements(&self) -> Option<Self> {
        Some(Self {
            source: self.source.element()?,
            destination: self.destination.element()?,
        })
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

// ============================================================================
// Type metadata
// ============================================================================

/// Kind of a catalog type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Built-in numeric or boolean value.
    Scalar,
    /// Immutable text; nullable by nature.
    Text,
    /// Value type with members, copied on assignment.
    Struct,
    /// Reference type with members, shared by identity.
    Class,
    Abstract,
    Interface,
    Array,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Text => write!(f, "text"),
            Self::Struct => write!(f, "struct"),
            Self::Class => write!(f, "class"),
            Self::Abstract => write!(f, "abstract"),
            Self::Interface => write!(f, "interface"),
            Self::Array => write!(f, "array"),
        }
    }
}

/// Literal constant usable as a parameter default or null substitute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(x) => Value::Float(*x),
            Literal::Text(s) => Value::Str(s.clone()),
        }
    }
}

/// A member of a catalog type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Declared member type
    #[serde(rename = "type")]
    pub ty: TypeKey,

    /// No setter (get-only property or init-only field)
    #[serde(default)]
    pub read_only: bool,

    /// Has a getter
    #[serde(default = "default_true")]
    pub readable: bool,
}

fn default_true() -> bool {
    true
}

/// A constructor parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,

    #[serde(rename = "type")]
    pub ty: TypeKey,

    /// Default value for optional parameters
    #[serde(default)]
    pub default: Option<Literal>,
}

impl ParameterInfo {
    pub fn new(name: &str, ty: impl Into<TypeKey>) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.into(),
            default: None,
        }
    }
}

/// Metadata for one type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeInfo {
    pub kind: TypeKind,

    /// Members in declaration order
    #[serde(default)]
    pub members: IndexMap<String, MemberInfo>,

    /// Parameters of the mapping constructor, if the type declares one
    #[serde(default)]
    pub constructor: Option<Vec<ParameterInfo>>,

    /// Has a parameterless constructor
    #[serde(default = "default_true")]
    pub default_constructible: bool,
}

impl TypeInfo {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            members: IndexMap::new(),
            constructor: None,
            default_constructible: true,
        }
    }

    pub fn class() -> Self {
        Self::new(TypeKind::Class)
    }

    pub fn structure() -> Self {
        Self::new(TypeKind::Struct)
    }

    /// Add a writable, readable member.
    pub fn member(mut self, name: &str, ty: impl Into<TypeKey>) -> Self {
        self.members.insert(
            name.to_string(),
            MemberInfo {
                ty: ty.into(),
                read_only: false,
                readable: true,
            },
        );
        self
    }

    /// Add a get-only member.
    pub fn read_only_member(mut self, name: &str, ty: impl Into<TypeKey>) -> Self {
        self.members.insert(
            name.to_string(),
            MemberInfo {
                ty: ty.into(),
                read_only: true,
                readable: true,
            },
        );
        self
    }

    /// Declare a constructor. `default_constructible` is cleared.
    pub fn constructor(mut self, parameters: Vec<ParameterInfo>) -> Self {
        self.constructor = Some(parameters);
        self.default_constructible = false;
        self
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Built-in scalar and text types.
pub const BUILTIN_TYPES: &[(&str, TypeKind)] = &[
    ("bool", TypeKind::Scalar),
    ("i64", TypeKind::Scalar),
    ("f64", TypeKind::Scalar),
    ("string", TypeKind::Text),
];

/// Registry of type metadata.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    types: IndexMap<TypeKey, TypeInfo>,
}

impl Default for TypeCatalog {
    fn default() -> Self {
        let mut types = IndexMap::new();
        for (name, kind) in BUILTIN_TYPES {
            types.insert(TypeKey::new(name), TypeInfo::new(*kind));
        }
        Self { types }
    }
}

impl TypeCatalog {
    pub fn register(&mut self, key: impl Into<TypeKey>, info: TypeInfo) {
        self.types.insert(key.into(), info);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, key: impl Into<TypeKey>, info: TypeInfo) -> Self {
        self.register(key, info);
        self
    }

    /// Metadata for a key; nullable markers are ignored.
    pub fn get(&self, key: &TypeKey) -> Option<&TypeInfo> {
        if key.is_nullable() {
            self.types.get(&key.underlying())
        } else {
            self.types.get(key)
        }
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.kind(key).is_some()
    }

    /// Iterate registered (non-builtin and builtin) types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&TypeKey, &TypeInfo)> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Kind of a key. Arrays are recognised structurally.
    pub fn kind(&self, key: &TypeKey) -> Option<TypeKind> {
        if let Some(element) = key.element() {
            return self.kind(&element).map(|_| TypeKind::Array);
        }
        self.get(key).map(|info| info.kind)
    }

    /// Value types are copied on assignment and cannot take part in reference identity.
    pub fn is_value_type(&self, key: &TypeKey) -> bool {
        matches!(self.kind(key), Some(TypeKind::Scalar | TypeKind::Struct))
    }

    /// Types with members, i.e. types a type map can target.
    pub fn is_structured(&self, key: &TypeKey) -> bool {
        matches!(
            self.kind(key),
            Some(TypeKind::Struct | TypeKind::Class | TypeKind::Abstract | TypeKind::Interface)
        )
    }

    /// Look up a member of a type.
    pub fn member(&self, ty: &TypeKey, name: &str) -> Option<&MemberInfo> {
        self.get(ty).and_then(|info| info.members.get(name))
    }

    /// Resolve the type reached by walking `path` from `root`.
    pub fn member_path_type(&self, root: &TypeKey, path: &[String]) -> MapResult<TypeKey> {
        let mut current = root.clone();
        for segment in path {
            let member = self
                .member(&current, segment)
                .ok_or_else(|| MapError::UnknownMember {
                    ty: current.to_string(),
                    member: segment.clone(),
                })?;
            current = member.ty.clone();
        }
        Ok(current)
    }

    /// `default(T)`: zero for scalars, default-initialised records for structs,
    /// null for nullable, text, reference and array types.
    pub fn default_value(&self, key: &TypeKey) -> Value {
        self.default_value_guarded(key, &mut Vec::new())
    }

    fn default_value_guarded(&self, key: &TypeKey, visiting: &mut Vec<TypeKey>) -> Value {
        if key.is_nullable() {
            return Value::Null;
        }
        match self.kind(key) {
            Some(TypeKind::Scalar) => scalar_default(key),
            Some(TypeKind::Struct) => {
                if visiting.contains(key) {
                    return Value::Null;
                }
                visiting.push(key.clone());
                let record = Value::Record(self.default_record(key, visiting));
                visiting.pop();
                record
            }
            _ => Value::Null,
        }
    }

    fn default_record(&self, key: &TypeKey, visiting: &mut Vec<TypeKey>) -> Record {
        let mut record = Record::new(key.clone());
        if let Some(info) = self.get(key) {
            for (name, member) in &info.members {
                record
                    .fields
                    .insert(name.clone(), self.default_value_guarded(&member.ty, visiting));
            }
        }
        record
    }

    /// Create a new default instance via the parameterless constructor.
    pub fn construct(&self, key: &TypeKey) -> MapResult<Value> {
        let key = key.underlying();
        match self.kind(&key) {
            Some(TypeKind::Class) => {
                let object = ObjectRef::new(key.clone());
                if let Some(info) = self.get(&key) {
                    for (name, member) in &info.members {
                        object.set(name, self.default_value(&member.ty));
                    }
                }
                Ok(Value::Object(object))
            }
            Some(TypeKind::Array) => Ok(Value::List(Vec::new())),
            Some(TypeKind::Interface | TypeKind::Abstract) => Err(MapError::configuration(
                None,
                format!("cannot create an instance of {} type {}", self.kind_name(&key), key),
            )),
            Some(_) => Ok(self.default_value(&key)),
            None => Err(MapError::configuration(None, format!("unknown type {}", key))),
        }
    }

    /// Create an instance through the declared constructor. Each argument is
    /// stored in the member whose name matches the parameter (case-insensitive).
    pub fn construct_with(&self, key: &TypeKey, arguments: &[(String, Value)]) -> MapResult<Value> {
        let key = key.underlying();
        let mut instance = match self.kind(&key) {
            Some(TypeKind::Class) => {
                let object = ObjectRef::new(key.clone());
                if let Some(info) = self.get(&key) {
                    for (name, member) in &info.members {
                        object.set(name, self.default_value(&member.ty));
                    }
                }
                Value::Object(object)
            }
            Some(TypeKind::Struct) => self.default_value(&key),
            _ => return self.construct(&key),
        };
        let members: Vec<String> = self
            .get(&key)
            .map(|info| info.members.keys().cloned().collect())
            .unwrap_or_default();
        for (parameter, value) in arguments {
            let target = members
                .iter()
                .find(|m| m.eq_ignore_ascii_case(parameter))
                .cloned()
                .unwrap_or_else(|| parameter.clone());
            instance.set_member(&target, value.clone())?;
        }
        Ok(instance)
    }

    fn kind_name(&self, key: &TypeKey) -> String {
        self.kind(key).map(|k| k.to_string()).unwrap_or_default()
    }
}

fn scalar_default(key: &TypeKey) -> Value {
    match key.as_str() {
        "bool" => Value::Bool(false),
        "f64" => Value::Float(0.0),
        _ => Value::Int(0),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TypeCatalog {
        TypeCatalog::default()
            .with(
                "Person",
                TypeInfo::class()
                    .member("Name", "string")
                    .member("Age", "i64")
                    .member("Manager", "Person"),
            )
            .with(
                "Point",
                TypeInfo::structure().member("X", "f64").member("Y", "f64"),
            )
            .with("IShape", TypeInfo::new(TypeKind::Interface))
    }

    #[test]
    fn test_mf001_type_key_suffixes() {
        let key = TypeKey::new("Person");
        assert!(!key.is_nullable());
        assert_eq!(key.nullable().as_str(), "Person?");
        assert_eq!(key.nullable().nullable().as_str(), "Person?");
        assert_eq!(key.nullable().underlying(), key);
        assert_eq!(TypeKey::new("Person[]").element(), Some(key.clone()));
        assert_eq!(TypeKey::new("Person[]?").element(), Some(key));
        assert!(TypeKey::new("i64").element().is_none());
    }

    #[test]
    fn test_mf001_pair_display_and_elements() {
        let pair = TypePair::new("Person[]", "PersonDto[]");
        assert_eq!(pair.to_string(), "Person[] -> PersonDto[]");
        assert_eq!(pair.elements(), Some(TypePair::new("Person", "PersonDto")));
        assert!(TypePair::new("Person", "PersonDto").elements().is_none());
    }

    #[test]
    fn test_mf001_kinds() {
        let c = catalog();
        assert_eq!(c.kind(&"Person".into()), Some(TypeKind::Class));
        assert_eq!(c.kind(&"Person?".into()), Some(TypeKind::Class));
        assert_eq!(c.kind(&"Point[]".into()), Some(TypeKind::Array));
        assert_eq!(c.kind(&"Missing".into()), None);
        assert!(c.is_value_type(&"Point".into()));
        assert!(c.is_value_type(&"i64".into()));
        assert!(!c.is_value_type(&"string".into()));
        assert!(!c.is_value_type(&"Person".into()));
    }

    #[test]
    fn test_mf001_default_values() {
        let c = catalog();
        assert_eq!(c.default_value(&"i64".into()), Value::Int(0));
        assert_eq!(c.default_value(&"i64?".into()), Value::Null);
        assert_eq!(c.default_value(&"string".into()), Value::Null);
        assert_eq!(c.default_value(&"Person".into()), Value::Null);
        let point = c.default_value(&"Point".into());
        assert_eq!(point.get_member("X").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_mf001_self_referential_struct_default_terminates() {
        let c = TypeCatalog::default().with("Loop", TypeInfo::structure().member("Next", "Loop"));
        let value = c.default_value(&"Loop".into());
        assert_eq!(value.get_member("Next").unwrap(), Value::Null);
    }

    #[test]
    fn test_mf001_construct_class_is_fresh_instance() {
        let c = catalog();
        let a = c.construct(&"Person".into()).unwrap();
        let b = c.construct(&"Person".into()).unwrap();
        assert!(!a.same_instance(&b));
        assert_eq!(a.get_member("Age").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_mf001_construct_interface_fails() {
        let c = catalog();
        let err = c.construct(&"IShape".into()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("interface"));
    }

    #[test]
    fn test_mf001_construct_with_matches_parameter_names() {
        let c = catalog();
        let value = c
            .construct_with(
                &"Person".into(),
                &[("name".to_string(), Value::Str("Ada".into()))],
            )
            .unwrap();
        assert_eq!(value.get_member("Name").unwrap(), Value::Str("Ada".into()));
    }

    #[test]
    fn test_mf001_member_path_type() {
        let c = catalog();
        let ty = c
            .member_path_type(&"Person".into(), &["Manager".to_string(), "Name".to_string()])
            .unwrap();
        assert_eq!(ty.as_str(), "string");
        assert!(c
            .member_path_type(&"Person".into(), &["Nope".to_string()])
            .is_err());
    }

    #[test]
    fn test_mf001_type_info_yaml() {
        let yaml = r#"
kind: class
members:
  Name: { type: string }
  Id: { type: i64, read_only: true }
constructor:
  - { name: id, type: i64, default: 7 }
default_constructible: false
"#;
        let info: TypeInfo = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(info.kind, TypeKind::Class);
        assert!(info.members["Id"].read_only);
        assert!(info.members["Name"].readable);
        let ctor = info.constructor.unwrap();
        assert_eq!(ctor[0].default, Some(Literal::Int(7)));
    }
}
