//! Dotted path helpers shared by the reshaper and the in-memory backend.

use serde_json::{Map, Value};

/// Looks up a dotted path inside a document. A literal key containing the
/// remaining dots wins over segment-by-segment descent. Arrays met along the
/// way are traversed element-wise and the hits gathered in order.
pub fn dig(value: &Value, path: &str) -> Option<Value> {
    let mut out = Vec::new();
    dig_into(value, path, &mut out);
    match out.len() {
        0 => None,
        1 if !matches!(value_at_first_array(value, path), Some(true)) => out.pop(),
        _ => Some(Value::Array(out)),
    }
}

/// All values found at `path`, with arrays along the way flattened.
pub fn dig_all(value: &Value, path: &str) -> Vec<Value> {
    let mut out = Vec::new();
    dig_into(value, path, &mut out);
    out
}

fn dig_into(value: &Value, path: &str, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                dig_into(item, path, out);
            }
        }
        Value::Object(map) => {
            if let Some(v) = map.get(path) {
                push_leaf(v, out);
                return;
            }
            if let Some((head, rest)) = path.split_once('.') {
                if let Some(child) = map.get(head) {
                    dig_into(child, rest, out);
                }
            }
        }
        _ => {}
    }
}

fn push_leaf(v: &Value, out: &mut Vec<Value>) {
    match v {
        Value::Null => {}
        Value::Array(items) => out.extend(items.iter().filter(|i| !i.is_null()).cloned()),
        other => out.push(other.clone()),
    }
}

// true when the path crosses or ends on an array, so a single hit still
// came from a list and keeps list shape for the caller to collapse
fn value_at_first_array(value: &Value, path: &str) -> Option<bool> {
    match value {
        Value::Array(_) => Some(true),
        Value::Object(map) => {
            if let Some(v) = map.get(path) {
                return Some(v.is_array());
            }
            let (head, rest) = path.split_once('.')?;
            value_at_first_array(map.get(head)?, rest)
        }
        _ => Some(false),
    }
}

/// Backend multi-value convention: one value unwraps to a scalar, none is
/// null, several stay an ordered sequence.
pub fn collapse(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

/// Inserts `value` at a dotted path, creating intermediate objects. A
/// non-object already sitting on the path is replaced.
pub fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                set_path(child, rest, value);
            }
        }
    }
}

/// Converts dotted keys into nested objects (`"a.b": 1` -> `{"a": {"b": 1}}`).
/// Values that are arrays of objects are unflattened element-wise.
pub fn unflatten(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in map {
        let v = match v {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|i| match i {
                        Value::Object(m) => Value::Object(unflatten(m)),
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        };
        set_path(&mut out, &k, v);
    }
    out
}

/// Strips `prefix.` from `path`, returning the remaining leaf path.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_prefix('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dig_walks_objects_and_literal_keys() {
        let doc = json!({"2012": {"earnings": {"median": 2608}}, "a.b": 1});
        assert_eq!(dig(&doc, "2012.earnings.median"), Some(json!(2608)));
        assert_eq!(dig(&doc, "a.b"), Some(json!(1)));
        assert_eq!(dig(&doc, "2012.sat_average"), None);
    }

    #[test]
    fn dig_gathers_through_arrays() {
        let doc = json!({"programs": [{"title": "Law"}, {"title": "Art"}, {"other": 1}]});
        assert_eq!(dig(&doc, "programs.title"), Some(json!(["Law", "Art"])));
        let one = json!({"programs": [{"title": "Law"}]});
        assert_eq!(dig(&one, "programs.title"), Some(json!(["Law"])));
    }

    #[test]
    fn collapse_unwraps_single_values() {
        assert_eq!(collapse(vec![json!("x")]), json!("x"));
        assert_eq!(collapse(vec![json!(1), json!(2)]), json!([1, 2]));
        assert_eq!(collapse(vec![]), Value::Null);
    }

    #[test]
    fn unflatten_nests_dotted_keys() {
        let mut m = Map::new();
        m.insert("2012.sat_average".into(), Value::Null);
        m.insert("2012.earnings.median".into(), json!(5));
        m.insert("name".into(), json!("x"));
        let out = Value::Object(unflatten(m));
        assert_eq!(
            out,
            json!({"2012": {"sat_average": null, "earnings": {"median": 5}}, "name": "x"})
        );
    }

    #[test]
    fn strip_prefix_requires_segment_boundary() {
        assert_eq!(strip_prefix("latest.programs.title", "latest.programs"), Some("title"));
        assert_eq!(strip_prefix("latest.programsx", "latest.programs"), None);
        assert_eq!(strip_prefix("latest.programs", "latest.programs"), None);
    }
}
