use crate::paths::{collapse, dig, strip_prefix, unflatten};
use crate::query::SearchRequest;
use crate::response::{RawHit, Row};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// How the caller wants dotted projection keys rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFormat {
    #[default]
    Dotted,
    Nested,
}

impl KeyFormat {
    pub fn from_keys_nested(keys_nested: bool) -> Self {
        if keys_nested {
            KeyFormat::Nested
        } else {
            KeyFormat::Dotted
        }
    }
}

/// The four output shapes, picked from whether a nested filter was sent and
/// whether a projection was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReshapeMode {
    NoProjectionNoNested,
    NoProjectionNested,
    ProjectionNoNested,
    ProjectionNested,
}

impl ReshapeMode {
    pub fn for_request(request: &SearchRequest) -> Self {
        match (request.has_projection(), request.has_nested()) {
            (false, false) => ReshapeMode::NoProjectionNoNested,
            (false, true) => ReshapeMode::NoProjectionNested,
            (true, false) => ReshapeMode::ProjectionNoNested,
            (true, true) => ReshapeMode::ProjectionNested,
        }
    }
}

/// Turns backend hits into caller rows for the given request.
pub fn reshape(hits: &[RawHit], request: &SearchRequest, keys: KeyFormat) -> Vec<Row> {
    let fields = request.fields.as_deref().unwrap_or_default();
    match ReshapeMode::for_request(request) {
        ReshapeMode::NoProjectionNoNested => hits.iter().map(full_source).collect(),
        ReshapeMode::NoProjectionNested => hits.iter().flat_map(inner_sources).collect(),
        ReshapeMode::ProjectionNoNested => hits
            .iter()
            .map(|hit| project(hit, fields, false, keys))
            .collect(),
        ReshapeMode::ProjectionNested => hits
            .iter()
            .map(|hit| project(hit, fields, true, keys))
            .collect(),
    }
}

fn full_source(hit: &RawHit) -> Row {
    hit.source.clone().unwrap_or_default()
}

// one row per matched nested child
fn inner_sources(hit: &RawHit) -> Vec<Row> {
    hit.inner_hits
        .values()
        .flat_map(|inner| inner.hits.hits.iter().map(full_source))
        .collect()
}

/// Collapses a list-shaped value unless it holds child objects, which are
/// kept as a list.
fn collapse_value(value: Value) -> Value {
    match value {
        Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
            Value::Array(items)
        }
        Value::Array(items) => collapse(items),
        other => other,
    }
}

fn project(hit: &RawHit, fields: &[String], nested: bool, keys: KeyFormat) -> Row {
    let mut found: Row = hit
        .fields
        .iter()
        .filter(|(k, _)| fields.contains(k))
        .map(|(k, v)| (k.clone(), collapse_value(v.clone())))
        .collect();
    let mut consumed = BTreeSet::new();

    if nested {
        for (inner_path, inner) in &hit.inner_hits {
            let leaves: Vec<(&String, &str)> = fields
                .iter()
                .filter_map(|f| strip_prefix(f, inner_path).map(|leaf| (f, leaf)))
                .collect();
            if leaves.is_empty() {
                continue;
            }
            let children: Vec<Value> = inner
                .hits
                .hits
                .iter()
                .map(|child| {
                    let source = Value::Object(child.source.clone().unwrap_or_default());
                    let mut out = Map::new();
                    for (_, leaf) in &leaves {
                        let v = dig(&source, leaf).map(collapse_value).unwrap_or(Value::Null);
                        out.insert((*leaf).to_string(), v);
                    }
                    Value::Object(out)
                })
                .collect();
            for (full, _) in &leaves {
                found.remove(full.as_str());
                consumed.insert(full.as_str());
            }
            found.insert(inner_path.clone(), Value::Array(children));
        }
    }

    // fields the backend only hands back through _source
    if let Some(source) = &hit.source {
        let source = Value::Object(source.clone());
        for f in fields {
            if found.contains_key(f) || consumed.contains(f.as_str()) {
                continue;
            }
            if let Some(v) = dig(&source, f) {
                found.insert(f.clone(), collapse_value(v));
            }
        }
    }

    for f in fields {
        if !found.contains_key(f) && !consumed.contains(f.as_str()) {
            found.insert(f.clone(), Value::Null);
        }
    }

    match keys {
        KeyFormat::Dotted => found,
        KeyFormat::Nested => unflatten(found),
    }
}
