//! MF-002: Runtime values.
//!
//! `Record` is a value type (copied on assignment); `Object` is a reference
//! type whose identity is its allocation. Reference equality on objects is
//! what the reference cache and cycle preservation rely on.

use super::error::{MapError, MapResult};
use super::types::TypeKey;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A dynamically typed value flowing through a plan.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Record(Record),
    Object(ObjectRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Runtime type of a record or object.
    pub fn type_key(&self) -> Option<TypeKey> {
        match self {
            Self::Record(r) => Some(r.ty.clone()),
            Self::Object(o) => Some(o.type_key().clone()),
            _ => None,
        }
    }

    /// Identity of a reference-typed value; `None` for everything else.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Object(o) => Some(o.id()),
            _ => None,
        }
    }

    /// True when both values are the same object instance.
    pub fn same_instance(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Read a member. Reading through null is a `NullReference`; an absent
    /// field reads as null.
    pub fn get_member(&self, name: &str) -> MapResult<Value> {
        match self {
            Self::Null => Err(MapError::NullReference {
                member: name.to_string(),
            }),
            Self::Record(r) => Ok(r.fields.get(name).cloned().unwrap_or_default()),
            Self::Object(o) => Ok(o.get(name)),
            other => Err(MapError::UnknownMember {
                ty: other.kind_name().to_string(),
                member: name.to_string(),
            }),
        }
    }

    /// Write a member in place.
    pub fn set_member(&mut self, name: &str, value: Value) -> MapResult<()> {
        match self {
            Self::Null => Err(MapError::NullReference {
                member: name.to_string(),
            }),
            Self::Record(r) => {
                r.fields.insert(name.to_string(), value);
                Ok(())
            }
            Self::Object(o) => {
                o.set(name, value);
                Ok(())
            }
            other => Err(MapError::UnknownMember {
                ty: other.kind_name().to_string(),
                member: name.to_string(),
            }),
        }
    }

    /// Walk a member chain, returning `None` if any link before the last is null.
    pub fn get_path(&self, path: &[String]) -> MapResult<Option<Value>> {
        let mut current = self.clone();
        for segment in path {
            if current.is_null() {
                return Ok(None);
            }
            current = current.get_member(segment)?;
        }
        Ok(Some(current))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Object(_) => "object",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

/// A value-typed aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub ty: TypeKey,
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(ty: TypeKey) -> Self {
        Self {
            ty,
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

struct Object {
    ty: TypeKey,
    fields: RwLock<IndexMap<String, Value>>,
}

/// Shared handle to a reference-typed instance.
///
/// Cyclic graphs are expressed through these handles and are not reclaimed
/// until a link is cleared.
#[derive(Clone)]
pub struct ObjectRef(Arc<Object>);

impl ObjectRef {
    pub fn new(ty: TypeKey) -> Self {
        Self(Arc::new(Object {
            ty,
            fields: RwLock::new(IndexMap::new()),
        }))
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.0.ty
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, name: &str) -> Value {
        self.0.fields.read().get(name).cloned().unwrap_or_default()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0.fields.write().insert(name.to_string(), value);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    /// Snapshot of the field names and values.
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.0
            .fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl fmt::Debug for ObjectRef {
    // Fields are omitted: object graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({}@{:#x})", self.0.ty, self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mf002_object_identity() {
        let a = ObjectRef::new("Person".into());
        let b = ObjectRef::new("Person".into());
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a.clone()), Value::Object(b));
        assert!(Value::Object(a.clone()).same_instance(&Value::Object(a)));
    }

    #[test]
    fn test_mf002_record_copy_semantics() {
        let original = Value::Record(Record::new("Point".into()).with("X", 1.0));
        let mut copy = original.clone();
        copy.set_member("X", Value::Float(2.0)).unwrap();
        assert_eq!(original.get_member("X").unwrap(), Value::Float(1.0));
        assert_eq!(copy.get_member("X").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_mf002_object_shared_mutation() {
        let object = ObjectRef::new("Person".into());
        let mut alias = Value::Object(object.clone());
        alias.set_member("Name", "Ada".into()).unwrap();
        assert_eq!(object.get("Name"), Value::Str("Ada".into()));
    }

    #[test]
    fn test_mf002_null_member_access() {
        let err = Value::Null.get_member("Name").unwrap_err();
        assert!(matches!(err, MapError::NullReference { .. }));
        assert!(Value::Int(3).get_member("Name").is_err());
    }

    #[test]
    fn test_mf002_get_path_null_checks() {
        let inner = ObjectRef::new("Person".into()).with("Name", "Bob");
        let outer = Value::Object(ObjectRef::new("Person".into()).with("Manager", Value::Object(inner)));
        let path = vec!["Manager".to_string(), "Name".to_string()];
        assert_eq!(outer.get_path(&path).unwrap(), Some(Value::Str("Bob".into())));

        let orphan = Value::Object(ObjectRef::new("Person".into()));
        assert_eq!(orphan.get_path(&path).unwrap(), None);
    }

    #[test]
    fn test_mf002_cyclic_debug_terminates() {
        let a = ObjectRef::new("Node".into());
        a.set("Next", Value::Object(a.clone()));
        let text = format!("{:?}", Value::Object(a.clone()));
        assert!(text.starts_with("Object(Object(Node@"));
        a.set("Next", Value::Null);
    }
}
