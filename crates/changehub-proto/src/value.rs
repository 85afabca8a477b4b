//! Dynamic value model and the structural equality used for deduplication.
//!
//! Filters arrive as BSON documents of arbitrary shape. They are lifted into
//! [`Value`] so that client and server decide "same subscription" with the
//! same function, [`equal`].

use std::collections::BTreeMap;

use bson::{Bson, Document};

/// Key/value mapping. Key order carries no meaning.
pub type Map = BTreeMap<String, Value>;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null (BSON null or undefined).
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer number (BSON int32 or int64).
    Int(i64),
    /// Floating point number (BSON double).
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// Unordered key/value mapping.
    Map(Map),
    /// Any other BSON value (ObjectId, datetime, decimal, regex, binary, ...).
    Other(Bson),
}

impl Value {
    /// Canonical textual rendering.
    ///
    /// Follows the dynamic-language `String()` conversion: list elements are
    /// joined by `,` with null elements rendering empty, mappings render as
    /// `[object Object]`, integral floats drop their fractional part.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => render_float(*f),
            Value::String(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => other.render(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => "[object Object]".to_string(),
            Value::Other(bson) => render_bson(bson),
        }
    }

}

/// Structural equality over dynamic values.
///
/// Mappings compare key by key regardless of order. Lists are not compared
/// element-wise: like opaque values they are equal only when their
/// [`Value::render`] output matches, so `[{"a": 1}]` equals `[{"a": 2}]`.
/// Lists and opaque values share that rule across kinds too, so a
/// one-element list holding an ObjectId equals the ObjectId itself.
/// Subscription deduplication on both ends depends on this exact behavior.
pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => float_eq(*x, *y),
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            float_eq(*x as f64, *y)
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Map(x), Value::Map(y)) => equal_maps(x, y),
        (Value::List(_) | Value::Other(_), Value::List(_) | Value::Other(_)) => {
            a.render() == b.render()
        }
        _ => false,
    }
}

/// Compare two mappings: same key count and every key of `a` present in `b`
/// with an equal value.
pub fn equal_maps(a: &Map, b: &Map) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| equal(value, other)))
}

fn float_eq(x: f64, y: f64) -> bool {
    x == y || (x.is_nan() && y.is_nan())
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{}", f as i128)
    } else {
        f.to_string()
    }
}

fn render_bson(bson: &Bson) -> String {
    match bson {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        other => other.to_string(),
    }
}

/// Convert a BSON document into a mapping.
pub fn document_to_map(doc: &Document) -> Map {
    doc.iter()
        .map(|(key, value)| (key.clone(), Value::from(value.clone())))
        .collect()
}

impl From<Bson> for Value {
    fn from(bson: Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => Value::Bool(b),
            Bson::Int32(i) => Value::Int(i as i64),
            Bson::Int64(i) => Value::Int(i),
            Bson::Double(f) => Value::Float(f),
            Bson::String(s) => Value::String(s),
            Bson::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Bson::Document(doc) => Value::Map(document_to_map(&doc)),
            other => Value::Other(other),
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Map(document_to_map(&doc))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;

    fn map(doc: Document) -> Value {
        Value::from(doc)
    }

    #[test]
    fn test_reflexive() {
        let values = vec![
            Value::Null,
            Value::Bool(false),
            Value::Int(7),
            Value::Float(f64::NAN),
            Value::String("open".into()),
            Value::from(vec![1, 2, 3]),
            map(doc! { "a": { "b": [1, "x"] } }),
            Value::Other(Bson::ObjectId(ObjectId::new())),
        ];
        for value in &values {
            assert!(equal(value, value), "{:?} not equal to itself", value);
        }
    }

    #[test]
    fn test_symmetric_across_kinds() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(1),
            Value::Float(1.0),
            Value::String("1".into()),
            Value::from(vec![1]),
            map(doc! { "a": 1 }),
            Value::Other(Bson::ObjectId(ObjectId::new())),
        ];
        for a in &values {
            for b in &values {
                assert_eq!(equal(a, b), equal(b, a), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_different_kinds_not_equal() {
        assert!(!equal(&Value::Int(1), &Value::String("1".into())));
        assert!(!equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!equal(&Value::Null, &Value::Bool(false)));
        assert!(!equal(&Value::from(vec![1]), &Value::Int(1)));
        assert!(!equal(&map(doc! {}), &Value::List(vec![])));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(equal(&Value::Int(3), &Value::Float(3.0)));
        assert!(!equal(&Value::Int(3), &Value::Float(3.5)));
    }

    #[test]
    fn test_maps_ignore_insertion_order() {
        let a = map(doc! { "status": "open", "total": { "$gt": 10 } });
        let b = map(doc! { "total": { "$gt": 10 }, "status": "open" });
        assert!(equal(&a, &b));
    }

    #[test]
    fn test_maps_differ() {
        let base = map(doc! { "status": "open" });
        assert!(!equal(&base, &map(doc! { "status": "closed" })));
        assert!(!equal(&base, &map(doc! { "status": "open", "x": 1 })));
        assert!(!equal(&base, &map(doc! { "state": "open" })));
    }

    #[test]
    fn test_lists_compare_by_rendering() {
        let a = Value::from(vec![1, 2]);
        let b = Value::from(vec![1, 2]);
        assert!(equal(&a, &b));

        // Element-wise different but identical rendering
        let numbers = Value::from(vec![1, 2]);
        let strings = Value::from(vec!["1", "2"]);
        assert!(equal(&numbers, &strings));

        let first = Value::List(vec![map(doc! { "a": 1 })]);
        let second = Value::List(vec![map(doc! { "a": 2 })]);
        assert!(equal(&first, &second));

        assert!(!equal(&Value::from(vec![1, 2]), &Value::from(vec![2, 1])));
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Float(5.0).render(), "5");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Null, Value::from(vec![2, 3])]).render(),
            "1,,2,3"
        );
        assert_eq!(map(doc! { "a": 1 }).render(), "[object Object]");

        let oid = ObjectId::new();
        assert_eq!(Value::Other(Bson::ObjectId(oid)).render(), oid.to_hex());
    }

    #[test]
    fn test_object_ids() {
        let oid = ObjectId::new();
        let a = Value::from(Bson::ObjectId(oid));
        let b = Value::from(Bson::ObjectId(oid));
        assert!(equal(&a, &b));
        assert!(!equal(&a, &Value::from(Bson::ObjectId(ObjectId::new()))));
    }

    #[test]
    fn test_lists_and_opaque_values_compare_by_rendering() {
        let oid = ObjectId::new();
        let id = Value::from(Bson::ObjectId(oid));
        let wrapped = Value::from(Bson::Array(vec![Bson::ObjectId(oid)]));

        assert!(equal(&wrapped, &id));
        assert!(equal(&id, &wrapped));
        assert!(!equal(&Value::from(vec!["x"]), &id));
    }

    #[test]
    fn test_bson_conversion() {
        let doc = doc! {
            "n": Bson::Null,
            "b": true,
            "i": 5,
            "l": 5_000_000_000i64,
            "f": 1.5,
            "s": "x",
            "a": [1, "two"],
            "d": { "k": "v" },
        };
        let converted = document_to_map(&doc);
        assert_eq!(converted["n"], Value::Null);
        assert_eq!(converted["b"], Value::Bool(true));
        assert_eq!(converted["i"], Value::Int(5));
        assert_eq!(converted["l"], Value::Int(5_000_000_000));
        assert_eq!(converted["f"], Value::Float(1.5));
        assert_eq!(converted["s"], Value::from("x"));
        assert_eq!(converted["a"], Value::List(vec![Value::Int(1), Value::from("two")]));
        assert_eq!(converted["d"], map(doc! { "k": "v" }));
    }
}
