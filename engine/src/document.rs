//! Helpers for working with configuration documents.
//!
//! A configuration document is an arbitrary `serde_json::Value`, normally an
//! object. Locations inside a document are addressed by dotted paths such as
//! `projects.web.settings.port`. The empty path addresses the document root.
//! Keys that themselves contain dots are only reachable through the
//! segment-based `*_in` functions.

use crate::{error::Result, Error, Timestamp};
use serde_json::{Map, Value};

/// Document key holding the last modification time.
pub const LAST_MODIFIED_KEY: &str = "lastModified";

/// Join a parent path and a key into a dotted path.
pub fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Split a dotted path into its segments. The empty path has no segments.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "empty segment".to_string(),
        });
    }
    Ok(segments)
}

/// Look up the value at a dotted path.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    get_in(doc, &split_path(path).ok()?)
}

/// Set the value at a dotted path, creating intermediate objects as needed.
///
/// Intermediate values that are not objects are replaced by objects.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    set_in(doc, &split_path(path)?, value);
    Ok(())
}

/// Remove the value at a dotted path, returning it if present.
///
/// Removing the root path resets the document to an empty object.
pub fn remove_path(doc: &mut Value, path: &str) -> Result<Option<Value>> {
    Ok(remove_in(doc, &split_path(path)?))
}

/// Look up the value under a sequence of keys.
///
/// Keys are taken verbatim, so they may contain dots or be empty.
pub fn get_in<'a, S: AsRef<str>>(doc: &'a Value, segments: &[S]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(doc, |current, segment| current.as_object()?.get(segment.as_ref()))
}

/// Set the value under a sequence of keys. No keys replaces the whole document.
pub fn set_in<S: AsRef<str>>(doc: &mut Value, segments: &[S], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *doc = value;
        return;
    };

    let mut current = doc;
    for segment in parents {
        current = ensure_object(current)
            .entry(segment.as_ref().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert(last.as_ref().to_string(), value);
}

/// Remove the value under a sequence of keys. No keys resets the document to
/// an empty object.
pub fn remove_in<S: AsRef<str>>(doc: &mut Value, segments: &[S]) -> Option<Value> {
    let Some((last, parents)) = segments.split_last() else {
        return Some(std::mem::replace(doc, Value::Object(Map::new())));
    };

    let mut current = doc;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(segment.as_ref())?;
    }
    current.as_object_mut()?.remove(last.as_ref())
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

/// Human-readable name of a value's JSON type.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether two values share the same JSON type.
pub fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Read the top-level `lastModified` of a document in milliseconds.
///
/// Accepts integer milliseconds or an RFC 3339 string. Returns `None` when the
/// key is missing or unparseable.
pub fn last_modified(doc: &Value) -> Option<Timestamp> {
    match doc.get(LAST_MODIFIED_KEY)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_and_split() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a.b", "c"), "a.b.c");
        assert_eq!(split_path("a.b.c").unwrap(), vec!["a", "b", "c"]);
        assert!(split_path("").unwrap().is_empty());
        assert!(split_path("a..b").is_err());
    }

    #[test]
    fn get_nested() {
        let doc = json!({"a": {"b": {"c": 1}}});
        assert_eq!(get_path(&doc, "a.b.c"), Some(&json!(1)));
        assert_eq!(get_path(&doc, "a.x"), None);
        assert_eq!(get_path(&doc, ""), Some(&doc));
    }

    #[test]
    fn set_creates_intermediates() {
        let mut doc = json!({});
        set_path(&mut doc, "projects.web.port", json!(8080)).unwrap();
        assert_eq!(doc, json!({"projects": {"web": {"port": 8080}}}));

        set_path(&mut doc, "projects.web", json!("flat")).unwrap();
        assert_eq!(doc, json!({"projects": {"web": "flat"}}));
    }

    #[test]
    fn set_replaces_scalar_parent() {
        let mut doc = json!({"a": 5});
        set_path(&mut doc, "a.b", json!(true)).unwrap();
        assert_eq!(doc, json!({"a": {"b": true}}));
    }

    #[test]
    fn remove_nested() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove_path(&mut doc, "a.b").unwrap(), Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}}));
        assert_eq!(remove_path(&mut doc, "a.missing.deeper").unwrap(), None);
    }

    #[test]
    fn segments_keep_dotted_and_empty_keys() {
        let mut doc = json!({"files": {}});
        set_in(&mut doc, &["files", "config.yaml"], json!(1));
        assert_eq!(doc, json!({"files": {"config.yaml": 1}}));
        assert_eq!(get_in(&doc, &["files", "config.yaml"]), Some(&json!(1)));

        set_in(&mut doc, &[""], json!(true));
        assert_eq!(doc, json!({"": true, "files": {"config.yaml": 1}}));
        assert_eq!(remove_in(&mut doc, &[""]), Some(json!(true)));
        assert_eq!(remove_in(&mut doc, &["files", "config.yaml"]), Some(json!(1)));
        assert_eq!(doc, json!({"files": {}}));
    }

    #[test]
    fn last_modified_formats() {
        assert_eq!(last_modified(&json!({"lastModified": 1500})), Some(1500));
        assert_eq!(
            last_modified(&json!({"lastModified": "1970-01-01T00:00:02Z"})),
            Some(2000)
        );
        assert_eq!(last_modified(&json!({"lastModified": "yesterday"})), None);
        assert_eq!(last_modified(&json!({})), None);
    }

    #[test]
    fn kinds() {
        assert!(same_kind(&json!(1), &json!(2.5)));
        assert!(!same_kind(&json!([1]), &json!({"a": 1})));
        assert_eq!(kind_name(&json!("x")), "string");
    }
}
