//! Flat, read-only parameter record

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Line width used when deciding whether to wrap an array value
const LINE_WIDTH: usize = 79;
/// Gap between the field name column and the value
const NAME_GAP: usize = 4;

/// A decoded parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Array(Vec<Value>),
    Undefined,
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as f64 (integers widen)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(r) => Some(*r),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Render an element inside an array (text is quoted)
    fn fmt_element(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(true) => write!(f, "True"),
            Self::Logical(false) => write!(f, "False"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{:?}", r),
            Self::Text(s) => write!(f, "{}", s),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_element(f)?;
                }
                write!(f, "]")
            }
            Self::Undefined => write!(f, "<undefined>"),
        }
    }
}

struct Element<'a>(&'a Value);

impl fmt::Display for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_element(f)
    }
}

/// A field that was overwritten while flattening nested structures
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub field: String,
    pub replaced: Value,
}

/// Parameter values of one command, keyed by lower-case field name
///
/// Fields keep the order in which they were first seen in the container.
/// A missing key is the only "absent" marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    name: String,
    fields: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    collisions: Vec<Collision>,
}

impl Record {
    /// Build a record, letting later duplicates replace earlier values
    pub fn new(name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        let mut builder = RecordBuilder::new(name);
        for (key, value) in fields {
            builder.insert(key, value);
        }
        builder.finish()
    }

    /// Name of the command the record came from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.fields[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Values that were silently replaced by a later field of the same name
    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.keys().map(str::len).max().unwrap_or(0);
        let limit = LINE_WIDTH.saturating_sub(width + NAME_GAP);
        let gap = " ".repeat(NAME_GAP);

        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:>width$}{}", key, gap, width = width)?;

            match value {
                Value::Array(items) if !items.is_empty() && value.to_string().len() > limit => {
                    let indent = " ".repeat(width + NAME_GAP);
                    write!(f, "[ {}", Element(&items[0]))?;
                    for item in &items[1..] {
                        write!(f, "\n{}  {}", indent, Element(item))?;
                    }
                    write!(f, "\n{}]", indent)?;
                }
                other => write!(f, "{}", other)?,
            }
        }
        Ok(())
    }
}

/// Accumulates fields, tracking overwrites
#[derive(Debug, Default)]
pub(crate) struct RecordBuilder {
    name: String,
    fields: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    collisions: Vec<Collision>,
}

impl RecordBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Insert a field; returns the value it replaced, if any
    pub(crate) fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        match self.index.get(&key) {
            Some(&i) => {
                let replaced = std::mem::replace(&mut self.fields[i].1, value);
                self.collisions.push(Collision {
                    field: key,
                    replaced: replaced.clone(),
                });
                Some(replaced)
            }
            None => {
                self.index.insert(key.clone(), self.fields.len());
                self.fields.push((key, value));
                None
            }
        }
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn into_parts(self) -> (Vec<(String, Value)>, Vec<Collision>) {
        (self.fields, self.collisions)
    }

    pub(crate) fn absorb_collisions(&mut self, collisions: Vec<Collision>) {
        self.collisions.extend(collisions);
    }

    pub(crate) fn finish(self) -> Record {
        Record {
            name: self.name,
            fields: self.fields,
            index: self.index,
            collisions: self.collisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_lookup_and_order() {
        let record = Record::new(
            "stats",
            vec![
                ("mean".to_string(), Value::Real(2.5)),
                ("comp".to_string(), text("DATA")),
                ("numgood".to_string(), Value::Integer(100)),
            ],
        );
        assert_eq!(record.name(), "stats");
        assert_eq!(record.len(), 3);
        assert_eq!(record.get("mean").and_then(Value::as_f64), Some(2.5));
        assert_eq!(record.get("comp").and_then(Value::as_str), Some("DATA"));
        assert!(record.get("sigma").is_none());
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["mean", "comp", "numgood"]);
    }

    #[test]
    fn test_duplicate_keeps_position_and_records_collision() {
        let record = Record::new(
            "x",
            vec![
                ("a".to_string(), Value::Integer(1)),
                ("b".to_string(), Value::Integer(2)),
                ("a".to_string(), Value::Integer(3)),
            ],
        );
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&Value::Integer(3)));
        assert_eq!(record.collisions().len(), 1);
        assert_eq!(record.collisions()[0].replaced, Value::Integer(1));
    }

    #[test]
    fn test_display_right_aligns_names() {
        let record = Record::new(
            "stats",
            vec![
                ("mean".to_string(), Value::Real(2.5)),
                ("numgood".to_string(), Value::Integer(7)),
                ("order".to_string(), Value::Logical(false)),
            ],
        );
        assert_eq!(
            record.to_string(),
            "   mean    2.5\nnumgood    7\n  order    False"
        );
    }

    #[test]
    fn test_display_wraps_long_arrays() {
        let items: Vec<Value> = (0..30).map(|i| Value::Integer(1000 + i)).collect();
        let record = Record::new(
            "x",
            vec![
                ("dims".to_string(), Value::Array(items)),
                ("ab".to_string(), Value::Array(vec![text("a"), text("b")])),
            ],
        );
        let out = record.to_string();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "dims    [ 1000");
        assert_eq!(lines[1], "          1001");
        assert_eq!(lines[30], "        ]");
        assert_eq!(lines[31], "  ab    ['a', 'b']");
    }

    #[test]
    fn test_serialize_as_object() {
        let record = Record::new(
            "x",
            vec![
                ("mean".to_string(), Value::Real(1.5)),
                ("ndf".to_string(), text("m31")),
                ("dims".to_string(), Value::Array(vec![Value::Integer(1), Value::Integer(2)])),
                ("bad".to_string(), Value::Undefined),
            ],
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"mean":1.5,"ndf":"m31","dims":[1,2],"bad":null}"#);
    }
}
