//! Flatten an ADAM parameter container into a [`Record`]
//!
//! Rules:
//! - structures recurse and their fields merge into the parent without any
//!   prefix, so all leaves share one namespace (a later field replaces an
//!   earlier one of the same name; the replacement is logged and kept in
//!   [`Record::collisions`])
//! - a structure whose only field is `nameptr` collapses to that value,
//!   stored under the structure's own name
//! - the top-level `ADAM_DYNDEF` block is dropped
//! - character data is decoded as ISO-8859-1 and whitespace-trimmed

use std::path::Path;
use tracing::{debug, warn};

use crate::environ::Environment;
use crate::error::DecodeError;
use crate::hds::{container_path, Component, ComponentKind, ContainerSource, Primitive};
use crate::naming;
use crate::record::{Record, RecordBuilder, Value};

/// Bookkeeping block present in every parameter file
pub const DEFAULT_DEFINITIONS: &str = "ADAM_DYNDEF";

/// Field holding the target of an indirect (named) parameter reference
pub const NAME_POINTER: &str = "nameptr";

/// Decode the parameter container for `command_name` in `scratch`
///
/// Returns `Ok(None)` when the command left no container behind.
pub fn decode(
    command_name: &str,
    scratch: &Path,
    env: &Environment,
    source: &dyn ContainerSource,
) -> Result<Option<Record>, DecodeError> {
    let path = container_path(scratch, command_name);
    match source.open(&path, env)? {
        Some(root) => Ok(Some(flatten(command_name, &root))),
        None => {
            debug!(path = %path.display(), "no parameter container");
            Ok(None)
        }
    }
}

/// Decode a container file at any path, naming the record after its stem
pub fn decode_file(
    path: &Path,
    env: &Environment,
    source: &dyn ContainerSource,
) -> Result<Option<Record>, DecodeError> {
    let Some(root) = source.open(path, env)? else {
        return Ok(None);
    };
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| root.name.to_lowercase());
    Ok(Some(flatten(&name, &root)))
}

/// Flatten a container tree into a record named `name`
pub fn flatten(name: &str, root: &Component) -> Record {
    let mut record = RecordBuilder::new(name);
    for child in root.children() {
        if child.name.eq_ignore_ascii_case(DEFAULT_DEFINITIONS) {
            continue;
        }
        merge(&mut record, child);
    }
    record.finish()
}

fn merge(acc: &mut RecordBuilder, component: &Component) {
    let key = naming::field_name(&component.name);

    match &component.kind {
        ComponentKind::Structure(children) => {
            let mut nested = RecordBuilder::new(component.name.as_str());
            for child in children {
                merge(&mut nested, child);
            }

            let collapses = nested.len() == 1 && nested.keys().all(|k| k == NAME_POINTER);
            let (fields, collisions) = nested.into_parts();
            acc.absorb_collisions(collisions);

            if collapses {
                for (_, value) in fields {
                    insert(acc, key.clone(), value);
                }
            } else {
                for (field, value) in fields {
                    insert(acc, field, value);
                }
            }
        }
        ComponentKind::Primitive { shape, data, .. } => {
            insert(acc, key, primitive_value(shape, data));
        }
    }
}

fn insert(acc: &mut RecordBuilder, key: String, value: Value) {
    let field = key.clone();
    if let Some(replaced) = acc.insert(key, value) {
        warn!(%field, ?replaced, "parameter name collision while flattening; later value kept");
    }
}

/// Convert primitive data to a value: scalars unwrap, arrays stay flat
fn primitive_value(shape: &[usize], data: &Primitive) -> Value {
    let mut values: Vec<Value> = match data {
        Primitive::Undefined => return Value::Undefined,
        Primitive::Logical(v) => v.iter().map(|x| x.map_or(Value::Undefined, Value::Logical)).collect(),
        Primitive::Integer(v) => v.iter().map(|x| x.map_or(Value::Undefined, Value::Integer)).collect(),
        Primitive::Real(v) => v.iter().map(|x| x.map_or(Value::Undefined, Value::Real)).collect(),
        Primitive::Char(v) => v.iter().map(|bytes| Value::Text(decode_text(bytes))).collect(),
    };

    if shape.is_empty() {
        match values.len() {
            0 => Value::Undefined,
            _ => values.swap_remove(0),
        }
    } else {
        Value::Array(values)
    }
}

/// Decode HDS character bytes (ISO-8859-1) and trim surrounding whitespace
pub fn decode_text(bytes: &[u8]) -> String {
    latin1(bytes).trim().to_string()
}

/// Decode ISO-8859-1 bytes; every byte maps to the code point of equal value
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hds::HdsType;
    use std::sync::Mutex;

    fn real(name: &str, v: f64) -> Component {
        Component::primitive(name, HdsType::Double, vec![], Primitive::Real(vec![Some(v)]))
    }

    fn parameter_file(children: Vec<Component>) -> Component {
        Component::structure("STATS", "STATS", children)
    }

    #[test]
    fn test_character_values_are_trimmed() {
        let chars = Component::primitive(
            "LABELS",
            HdsType::Char(4),
            vec![2],
            Primitive::Char(vec![b"  a ".to_vec(), b" b  ".to_vec()]),
        );
        let record = flatten("x", &parameter_file(vec![Component::text("TITLE", "  hello   "), chars]));

        assert_eq!(record.get("title"), Some(&Value::Text("hello".to_string())));
        assert_eq!(
            record.get("labels"),
            Some(&Value::Array(vec![
                Value::Text("a".to_string()),
                Value::Text("b".to_string())
            ]))
        );
    }

    #[test]
    fn test_latin1_bytes_become_text() {
        let comp = Component::primitive(
            "UNIT",
            HdsType::Char(8),
            vec![],
            Primitive::Char(vec![vec![0xC5, b'n', b'g']]),
        );
        let record = flatten("x", &parameter_file(vec![comp]));
        assert_eq!(record.get("unit").and_then(Value::as_str), Some("\u{c5}ng"));
    }

    #[test]
    fn test_name_pointer_collapses() {
        let ndf = Component::structure("NDF", "NDF_PAR", vec![Component::text("NAMEPTR", "M31")]);
        let record = flatten("stats", &parameter_file(vec![ndf, real("MEAN", 1.0)]));

        assert_eq!(record.get("ndf"), Some(&Value::Text("M31".to_string())));
        assert!(record.get("nameptr").is_none());
        assert!(record.collisions().is_empty());
    }

    #[test]
    fn test_sibling_structures_collide_last_wins() {
        let first = Component::structure(
            "IN",
            "NDF_PAR",
            vec![Component::text("NAMEPTR", "first"), real("A", 1.0)],
        );
        let second = Component::structure(
            "OUT",
            "NDF_PAR",
            vec![Component::text("NAMEPTR", "second"), real("B", 2.0)],
        );
        let record = flatten("x", &parameter_file(vec![first, second]));

        assert_eq!(record.get("nameptr"), Some(&Value::Text("second".to_string())));
        assert_eq!(record.get("a"), Some(&Value::Real(1.0)));
        assert_eq!(record.get("b"), Some(&Value::Real(2.0)));
        assert!(record.get("in_").is_none());
        assert_eq!(record.collisions().len(), 1);
        assert_eq!(record.collisions()[0].field, "nameptr");
        assert_eq!(record.collisions()[0].replaced, Value::Text("first".to_string()));
    }

    #[test]
    fn test_nested_fields_are_not_prefixed() {
        let inner = Component::structure("INNER", "STRUC", vec![real("DEEP", 3.0)]);
        let outer = Component::structure("OUTER", "STRUC", vec![inner, real("SHALLOW", 2.0)]);
        let record = flatten("x", &parameter_file(vec![outer]));

        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["deep", "shallow"]);
    }

    #[test]
    fn test_default_definitions_dropped() {
        let dyndef = Component::structure("ADAM_DYNDEF", "DEFINITIONS", vec![real("SECRET", 9.0)]);
        let record = flatten("x", &parameter_file(vec![dyndef, real("MEAN", 1.0)]));

        assert_eq!(record.len(), 1);
        assert!(record.get("adam_dyndef").is_none());
        assert!(record.get("secret").is_none());
    }

    #[test]
    fn test_reserved_names_are_marked() {
        let record = flatten("x", &parameter_file(vec![Component::text("TYPE", "_REAL")]));
        assert_eq!(record.get("type_").and_then(Value::as_str), Some("_REAL"));
    }

    #[test]
    fn test_bad_and_undefined_values() {
        let bad = Component::primitive(
            "DIMS",
            HdsType::Integer,
            vec![3],
            Primitive::Integer(vec![Some(1), None, Some(3)]),
        );
        let undefined = Component::primitive("CLIP", HdsType::Real, vec![], Primitive::Undefined);
        let record = flatten("x", &parameter_file(vec![bad, undefined]));

        assert_eq!(
            record.get("dims"),
            Some(&Value::Array(vec![Value::Integer(1), Value::Undefined, Value::Integer(3)]))
        );
        assert_eq!(record.get("clip"), Some(&Value::Undefined));
    }

    struct OneShot(Mutex<Option<Component>>);

    impl ContainerSource for OneShot {
        fn open(&self, path: &Path, _env: &Environment) -> Result<Option<Component>, DecodeError> {
            assert!(path.ends_with("stats.sdf"));
            Ok(self.0.lock().unwrap().take())
        }
    }

    #[test]
    fn test_decode_returns_none_when_absent() {
        let source = OneShot(Mutex::new(None));
        let result = decode("stats", Path::new("/tmp"), &Environment::default(), &source).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_file_names_record_after_stem() {
        let source = OneShot(Mutex::new(Some(parameter_file(vec![real("MEAN", 4.5)]))));
        let record = decode_file(Path::new("/data/STATS.sdf"), &Environment::default(), &source)
            .unwrap()
            .unwrap();
        assert_eq!(record.name(), "stats");
        assert_eq!(record.get("mean").and_then(Value::as_f64), Some(4.5));
    }

    #[test]
    fn test_latin1_keeps_whitespace() {
        assert_eq!(latin1(&[b' ', 0xE9, b'\n']), " \u{e9}\n");
    }

    #[test]
    fn test_decode_flattens_container() {
        let source = OneShot(Mutex::new(Some(parameter_file(vec![real("MEAN", 4.5)]))));
        let record = decode("stats", Path::new("/tmp"), &Environment::default(), &source)
            .unwrap()
            .unwrap();
        assert_eq!(record.name(), "stats");
        assert_eq!(record.get("mean").and_then(Value::as_f64), Some(4.5));
    }
}
