//! MF-008: Built-in conversions for member pairs without a type map.

use super::error::{MapError, MapResult};
use super::types::{TypeCatalog, TypeKey, TypePair};
use super::value::Value;

/// Convert `value` (declared as `from`) into `to`.
///
/// Null converts to the default of `to`. Scalars and text convert among each
/// other where the value allows it; identical types are assigned as-is.
pub fn convert(value: &Value, from: &TypeKey, to: &TypeKey, catalog: &TypeCatalog) -> MapResult<Value> {
    if value.is_null() {
        return Ok(catalog.default_value(to));
    }
    let target = to.underlying();
    if let (Some(element), Value::List(items)) = (target.element(), value) {
        let from_element = from.element().unwrap_or_else(|| element.clone());
        return items
            .iter()
            .map(|item| convert(item, &from_element, &element, catalog))
            .collect::<MapResult<Vec<_>>>()
            .map(Value::List);
    }
    let converted = match (target.as_str(), value) {
        ("i64", Value::Int(i)) => Some(Value::Int(*i)),
        ("i64", Value::Float(x)) => Some(x.trunc())
            .filter(|t| (i64::MIN as f64..i64::MAX as f64).contains(t))
            .map(|t| Value::Int(t as i64)),
        ("i64", Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
        ("i64", Value::Str(s)) => s.trim().parse().ok().map(Value::Int),
        ("f64", Value::Float(x)) => Some(Value::Float(*x)),
        ("f64", Value::Int(i)) => Some(Value::Float(*i as f64)),
        ("f64", Value::Str(s)) => s.trim().parse().ok().map(Value::Float),
        ("bool", Value::Bool(b)) => Some(Value::Bool(*b)),
        ("bool", Value::Int(i)) => Some(Value::Bool(*i != 0)),
        ("bool", Value::Str(s)) => s.trim().to_ascii_lowercase().parse().ok().map(Value::Bool),
        ("string", Value::Str(s)) => Some(Value::Str(s.clone())),
        ("string", Value::Int(i)) => Some(Value::Str(i.to_string())),
        ("string", Value::Float(x)) => Some(Value::Str(x.to_string())),
        ("string", Value::Bool(b)) => Some(Value::Str(b.to_string())),
        _ if from.underlying() == target => Some(value.clone()),
        _ if value.type_key().is_some_and(|ty| ty == target) => Some(value.clone()),
        _ => None,
    };
    converted.ok_or_else(|| MapError::Conversion {
        from: from.clone(),
        to: to.clone(),
        value: describe(value),
    })
}

/// Compile-time check for a member pair with no associated type map. Two
/// distinct structured types need a type map; everything else is left to
/// [`convert`].
pub fn check_convertible(catalog: &TypeCatalog, owner: &TypePair, types: &TypePair) -> MapResult<()> {
    if let Some(elements) = types.elements() {
        return check_convertible(catalog, owner, &elements);
    }
    let from = types.source.underlying();
    let to = types.destination.underlying();
    if from != to && catalog.is_structured(&from) && catalog.is_structured(&to) {
        return Err(MapError::configuration(
            Some(owner),
            format!("missing type map configuration or unsupported mapping {} -> {}", from, to),
        ));
    }
    Ok(())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("'{}'", s),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.kind_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TypeInfo;
    use crate::core::value::Record;

    fn k(s: &str) -> TypeKey {
        TypeKey::new(s)
    }

    #[test]
    fn test_mf008_scalar_conversions() {
        let c = TypeCatalog::default();
        assert_eq!(convert(&Value::Int(3), &k("i64"), &k("f64"), &c).unwrap(), Value::Float(3.0));
        assert_eq!(convert(&Value::Float(3.9), &k("f64"), &k("i64"), &c).unwrap(), Value::Int(3));
        assert_eq!(
            convert(&Value::Str(" 42 ".into()), &k("string"), &k("i64"), &c).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            convert(&Value::Int(7), &k("i64"), &k("string"), &c).unwrap(),
            Value::Str("7".into())
        );
        assert_eq!(
            convert(&Value::Str("TRUE".into()), &k("string"), &k("bool"), &c).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_mf008_out_of_range_float_fails() {
        let c = TypeCatalog::default();
        for x in [1e300, -1e300, f64::NAN, f64::INFINITY, 9.3e18] {
            let err = convert(&Value::Float(x), &k("f64"), &k("i64"), &c).unwrap_err();
            assert!(matches!(err, MapError::Conversion { .. }), "{x}");
        }
        assert_eq!(
            convert(&Value::Float(-9.2e18), &k("f64"), &k("i64"), &c).unwrap(),
            Value::Int(-9_200_000_000_000_000_000)
        );
    }

    #[test]
    fn test_mf008_null_converts_to_default() {
        let c = TypeCatalog::default();
        assert_eq!(convert(&Value::Null, &k("i64?"), &k("i64"), &c).unwrap(), Value::Int(0));
        assert_eq!(convert(&Value::Null, &k("i64"), &k("i64?"), &c).unwrap(), Value::Null);
    }

    #[test]
    fn test_mf008_unparseable_text_fails() {
        let c = TypeCatalog::default();
        let err = convert(&Value::Str("abc".into()), &k("string"), &k("i64"), &c).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert 'abc' from string to i64");
    }

    #[test]
    fn test_mf008_same_structured_type_assigns() {
        let c = TypeCatalog::default().with("Point", TypeInfo::structure().member("X", "f64"));
        let point = Value::Record(Record::new(k("Point")).with("X", 1.5));
        assert_eq!(convert(&point, &k("Point"), &k("Point"), &c).unwrap(), point);
    }

    #[test]
    fn test_mf008_arrays_convert_element_wise() {
        let c = TypeCatalog::default();
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            convert(&list, &k("i64[]"), &k("string[]"), &c).unwrap(),
            Value::List(vec![Value::Str("1".into()), Value::Str("2".into())])
        );
    }

    #[test]
    fn test_mf008_structured_pair_needs_type_map() {
        let c = TypeCatalog::default()
            .with("Person", TypeInfo::class())
            .with("PersonDto", TypeInfo::class());
        let owner = TypePair::new("Order", "OrderDto");
        let err = check_convertible(&c, &owner, &TypePair::new("Person", "PersonDto")).unwrap_err();
        assert!(err.is_configuration());
        assert!(check_convertible(&c, &owner, &TypePair::new("Person[]", "PersonDto[]")).is_err());
        assert!(check_convertible(&c, &owner, &TypePair::new("i64", "string")).is_ok());
        assert!(check_convertible(&c, &owner, &TypePair::new("Person", "Person?")).is_ok());
    }
}
