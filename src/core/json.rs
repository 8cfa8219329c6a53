//! MF-018: JSON codec for typed values.
//!
//! Objects carry `"$id"` on first occurrence and are written as
//! `{"$ref": id}` afterwards, so shared and cyclic graphs survive a round trip.
//! Records (value types) are always written inline.

use super::error::{MapError, MapResult};
use super::types::{TypeCatalog, TypeKey, TypeKind};
use super::value::{ObjectRef, Record, Value};
use rustc_hash::FxHashMap;
use serde_json::{Map, Number, Value as Json};

const ID: &str = "$id";
const REF: &str = "$ref";

/// Encode `value` as JSON.
pub fn to_json(value: &Value) -> Json {
    Writer::default().write(value)
}

/// Decode `json` as an instance of `ty`.
pub fn from_json(json: &Json, ty: &TypeKey, catalog: &TypeCatalog) -> MapResult<Value> {
    Reader {
        catalog,
        objects: FxHashMap::default(),
    }
    .read(json, ty)
}

#[derive(Default)]
struct Writer {
    ids: FxHashMap<usize, String>,
}

impl Writer {
    fn write(&mut self, value: &Value) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(|v| self.write(v)).collect()),
            Value::Record(record) => {
                let mut map = Map::new();
                for (name, field) in &record.fields {
                    map.insert(name.clone(), self.write(field));
                }
                Json::Object(map)
            }
            Value::Object(object) => {
                if let Some(id) = self.ids.get(&object.id()) {
                    let mut map = Map::new();
                    map.insert(REF.to_string(), Json::String(id.clone()));
                    return Json::Object(map);
                }
                let id = (self.ids.len() + 1).to_string();
                self.ids.insert(object.id(), id.clone());
                let mut map = Map::new();
                map.insert(ID.to_string(), Json::String(id));
                for (name, field) in object.fields() {
                    let encoded = self.write(&field);
                    map.insert(name, encoded);
                }
                Json::Object(map)
            }
        }
    }
}

struct Reader<'c> {
    catalog: &'c TypeCatalog,
    objects: FxHashMap<String, ObjectRef>,
}

impl Reader<'_> {
    fn read(&mut self, json: &Json, ty: &TypeKey) -> MapResult<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let ty = ty.underlying();
        if let Some(element) = ty.element() {
            let Json::Array(items) = json else {
                return Err(self.mismatch(json, &ty));
            };
            return items
                .iter()
                .map(|item| self.read(item, &element))
                .collect::<MapResult<Vec<_>>>()
                .map(Value::List);
        }
        match self.catalog.kind(&ty) {
            Some(TypeKind::Scalar) => self.read_scalar(json, &ty),
            Some(TypeKind::Text) => json
                .as_str()
                .map(|s| Value::Str(s.to_string()))
                .ok_or_else(|| self.mismatch(json, &ty)),
            Some(TypeKind::Struct) => {
                let Json::Object(map) = json else {
                    return Err(self.mismatch(json, &ty));
                };
                let mut record = Record::new(ty.clone());
                for (name, member) in self.members(&ty) {
                    let field = match map.get(&name) {
                        Some(value) => self.read(value, &member)?,
                        None => self.catalog.default_value(&member),
                    };
                    record.fields.insert(name, field);
                }
                Ok(Value::Record(record))
            }
            Some(_) => self.read_object(json, &ty),
            None => Err(MapError::Document(format!("unknown type {}", ty))),
        }
    }

    fn read_scalar(&self, json: &Json, ty: &TypeKey) -> MapResult<Value> {
        let value = match ty.as_str() {
            "i64" => json.as_i64().map(Value::Int),
            "f64" => json.as_f64().map(Value::Float),
            "bool" => json.as_bool().map(Value::Bool),
            _ => None,
        };
        value.ok_or_else(|| self.mismatch(json, ty))
    }

    fn read_object(&mut self, json: &Json, ty: &TypeKey) -> MapResult<Value> {
        let Json::Object(map) = json else {
            return Err(self.mismatch(json, ty));
        };
        if let Some(reference) = map.get(REF) {
            let id = reference.as_str().unwrap_or_default();
            return self
                .objects
                .get(id)
                .map(|object| Value::Object(object.clone()))
                .ok_or_else(|| MapError::Document(format!("unresolved $ref '{}'", id)));
        }
        let object = ObjectRef::new(ty.clone());
        if let Some(id) = map.get(ID).and_then(Json::as_str) {
            self.objects.insert(id.to_string(), object.clone());
        }
        for (name, member) in self.members(ty) {
            let field = match map.get(&name) {
                Some(value) => self.read(value, &member)?,
                None => self.catalog.default_value(&member),
            };
            object.set(&name, field);
        }
        Ok(Value::Object(object))
    }

    fn members(&self, ty: &TypeKey) -> Vec<(String, TypeKey)> {
        self.catalog
            .get(ty)
            .map(|info| info.members.iter().map(|(n, m)| (n.clone(), m.ty.clone())).collect())
            .unwrap_or_default()
    }

    fn mismatch(&self, json: &Json, ty: &TypeKey) -> MapError {
        MapError::Conversion {
            from: TypeKey::new("json"),
            to: ty.clone(),
            value: json.to_string(),
        }
    }
}
