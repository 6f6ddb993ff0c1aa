//! Dotted-path access into generic JSON trees.
//!
//! These two functions are the sole primitives the translators use to read
//! and write provider JSON; templates express every wire mapping as a
//! dotted path interpreted here.

use serde_json::{Map, Value};

/// Descend `root` along `"a.b.c"`, returning the value at the leaf.
///
/// Returns `None` as soon as a segment is missing or the current node is
/// not an object.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Assign `root.a.b.c = value` for `path = "a.b.c"`.
///
/// Intermediate objects are created as needed and sibling keys at every
/// level are preserved. A non-object node in the way (including a non-object
/// `root`) is replaced by an object.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            ensure_object(root).insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = ensure_object(root)
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(child, rest, value);
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
