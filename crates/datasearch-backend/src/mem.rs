use crate::metrics::BACKEND_SEARCH_SECONDS;
use crate::traits::SearchBackend;
use datasearch_core::checker::parse_distance;
use datasearch_core::paths::{dig, dig_all, strip_prefix};
use datasearch_core::query::{Aggregation, FilterClause, SortClause};
use datasearch_core::response::{InnerHits, RawHit, RawHits};
use datasearch_core::{GeoPoint, RawResponse, Result, Row, SearchError, SearchRequest, SortOrder};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// In-process backend that evaluates structured requests over JSON
/// documents. Used for tests and local runs without a search cluster.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    // index name -> documents in insertion order
    indices: HashMap<String, Vec<Value>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().indices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn doc_count(&self, index: &str) -> Option<usize> {
        self.inner.read().indices.get(index).map(Vec::len)
    }
}

#[async_trait::async_trait]
impl SearchBackend for InMemoryBackend {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<RawResponse> {
        let _timer = BACKEND_SEARCH_SECONDS
            .with_label_values(&[self.name()])
            .start_timer();
        let t0 = Instant::now();
        let inner = self.inner.read();
        let docs = inner
            .indices
            .get(index)
            .ok_or_else(|| SearchError::Backend(format!("no such index [{}]", index)))?;

        let mut matched: Vec<(usize, &Value, Vec<Value>)> = Vec::new();
        for (pos, doc) in docs.iter().enumerate() {
            if !request.filters.iter().all(|c| clause_matches(c, doc, None)) {
                continue;
            }
            let children = match &request.nested {
                Some(n) => {
                    let children: Vec<Value> = dig_all(doc, &n.path)
                        .into_iter()
                        .filter(|child| {
                            child.is_object()
                                && n.clauses.iter().all(|c| clause_matches(c, child, Some(&n.path)))
                        })
                        .collect();
                    if children.is_empty() {
                        continue;
                    }
                    children
                }
                None => Vec::new(),
            };
            matched.push((pos, doc, children));
        }

        let mut aggregations = Map::new();
        for (name, agg) in &request.aggregations {
            let Aggregation::ExtendedStats { field } = agg;
            let values: Vec<f64> = matched
                .iter()
                .flat_map(|(_, doc, _)| dig_all(doc, field))
                .filter_map(|v| as_number(&v))
                .collect();
            aggregations.insert(name.clone(), extended_stats(&values));
        }

        let total = matched.len() as u64;
        let hits = if request.count_only {
            Vec::new()
        } else {
            if !request.sort.is_empty() {
                matched.sort_by(|a, b| compare_docs(a.1, b.1, &request.sort));
            }
            matched
                .into_iter()
                .skip(request.from as usize)
                .take(request.size as usize)
                .map(|(pos, doc, children)| to_hit(pos, doc, children, request))
                .collect()
        };

        Ok(RawResponse {
            took: t0.elapsed().as_millis() as u64,
            hits: RawHits { total, hits },
            aggregations: (!request.aggregations.is_empty()).then_some(aggregations),
        })
    }

    async fn create_index(&self, index: &str, _mapping: &Value) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.indices.contains_key(index) {
            return Err(SearchError::Backend(format!(
                "index [{}] already exists",
                index
            )));
        }
        inner.indices.insert(index.to_string(), Vec::new());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.inner.write().indices.remove(index);
        Ok(())
    }

    async fn bulk_index(&self, index: &str, docs: Vec<Row>) -> Result<u64> {
        let n = docs.len() as u64;
        self.inner
            .write()
            .indices
            .entry(index.to_string())
            .or_default()
            .extend(docs.into_iter().map(Value::Object));
        Ok(n)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn to_hit(pos: usize, doc: &Value, children: Vec<Value>, request: &SearchRequest) -> RawHit {
    let mut hit = RawHit {
        id: Some(pos.to_string()),
        score: Some(1.0),
        ..Default::default()
    };
    match &request.fields {
        None => hit.source = doc.as_object().cloned(),
        Some(_) => {
            for f in request.flat_fields() {
                let values = dig_all(doc, f);
                if !values.is_empty() {
                    hit.fields.insert(f.to_string(), Value::Array(values));
                }
            }
            if !request.source_fields.is_empty() {
                let paths: Vec<&str> = request.source_fields.iter().map(String::as_str).collect();
                hit.source = match include_paths(doc, &paths) {
                    Some(Value::Object(m)) => Some(m),
                    _ => Some(Map::new()),
                };
            }
        }
    }
    if let Some(n) = &request.nested {
        let inner: Vec<RawHit> = children
            .into_iter()
            .map(|child| RawHit {
                score: Some(1.0),
                source: child.as_object().cloned(),
                ..Default::default()
            })
            .collect();
        hit.inner_hits.insert(
            n.path.clone(),
            InnerHits {
                hits: RawHits {
                    total: inner.len() as u64,
                    hits: inner,
                },
            },
        );
    }
    hit
}

/// Source filtering: keeps only the branches of `value` leading to `paths`.
fn include_paths(value: &Value, paths: &[&str]) -> Option<Value> {
    match value {
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|i| include_paths(i, paths))
                .collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if paths.iter().any(|p| *p == k.as_str()) {
                    out.insert(k.clone(), v.clone());
                    continue;
                }
                let rest: Vec<&str> = paths.iter().filter_map(|p| strip_prefix(p, k)).collect();
                if rest.is_empty() {
                    continue;
                }
                if let Some(sub) = include_paths(v, &rest) {
                    out.insert(k.clone(), sub);
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        _ => None,
    }
}

fn clause_matches(clause: &FilterClause, doc: &Value, scope: Option<&str>) -> bool {
    let field = clause.field();
    let path = scope.and_then(|s| strip_prefix(field, s)).unwrap_or(field);
    match clause {
        FilterClause::Term { value, .. } => dig_all(doc, path).iter().any(|v| values_equal(v, value)),
        FilterClause::Terms { values, .. } => dig_all(doc, path)
            .iter()
            .any(|v| values.iter().any(|want| values_equal(v, want))),
        FilterClause::Range { gte, lte, .. } => dig_all(doc, path).iter().any(|v| {
            gte.as_ref()
                .map_or(true, |b| matches!(compare_values(v, b), Some(Ordering::Greater | Ordering::Equal)))
                && lte
                    .as_ref()
                    .map_or(true, |b| matches!(compare_values(v, b), Some(Ordering::Less | Ordering::Equal)))
        }),
        FilterClause::GeoDistance {
            distance, point, ..
        } => {
            let Some(limit) = distance_meters(distance) else {
                return false;
            };
            dig(doc, path)
                .and_then(|v| as_geo_point(&v))
                .map_or(false, |p| haversine(*point, p) <= limit)
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_equal(stored: &Value, wanted: &Value) -> bool {
    match (as_number(stored), as_number(wanted)) {
        (Some(a), Some(b)) if stored.is_number() || wanted.is_number() => a == b,
        _ => as_text(stored) == as_text(wanted),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

// missing values sort last regardless of direction
fn compare_docs(a: &Value, b: &Value, sort: &[SortClause]) -> Ordering {
    for clause in sort {
        let va = dig_all(a, &clause.field).into_iter().next();
        let vb = dig_all(b, &clause.field).into_iter().next();
        let ord = match (&va, &vb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y).unwrap_or(Ordering::Equal);
                match clause.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn distance_meters(raw: &str) -> Option<f64> {
    let (magnitude, unit) = parse_distance(raw)?;
    let factor = match unit {
        "mi" => 1609.344,
        "km" => 1000.0,
        "yd" => 0.9144,
        "ft" => 0.3048,
        _ => 1.0,
    };
    Some(magnitude * factor)
}

/// Accepts `{lat, lon}`, `"lat,lon"` and `[lon, lat]` point encodings.
fn as_geo_point(v: &Value) -> Option<GeoPoint> {
    match v {
        Value::Object(m) => Some(GeoPoint {
            lat: as_number(m.get("lat")?)?,
            lon: as_number(m.get("lon")?)?,
        }),
        Value::String(s) => {
            let (lat, lon) = s.split_once(',')?;
            Some(GeoPoint {
                lat: lat.trim().parse().ok()?,
                lon: lon.trim().parse().ok()?,
            })
        }
        Value::Array(a) if a.len() == 2 => Some(GeoPoint {
            lon: as_number(&a[0])?,
            lat: as_number(&a[1])?,
        }),
        _ => None,
    }
}

fn haversine(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn extended_stats(values: &[f64]) -> Value {
    let count = values.len();
    if count == 0 {
        return json!({
            "count": 0, "min": null, "max": null, "avg": null, "sum": 0.0,
            "sum_of_squares": null, "variance": null, "std_deviation": null,
            "std_deviation_bounds": {"upper": null, "lower": null}
        });
    }
    let n = count as f64;
    let sum: f64 = values.iter().sum();
    let sum_of_squares: f64 = values.iter().map(|v| v * v).sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = sum / n;
    let variance = (sum_of_squares / n - avg * avg).max(0.0);
    let std_deviation = variance.sqrt();
    let mut stats = BTreeMap::new();
    stats.insert("count", json!(count));
    stats.insert("min", json!(min));
    stats.insert("max", json!(max));
    stats.insert("avg", json!(avg));
    stats.insert("sum", json!(sum));
    stats.insert("sum_of_squares", json!(sum_of_squares));
    stats.insert("variance", json!(variance));
    stats.insert("std_deviation", json!(std_deviation));
    stats.insert(
        "std_deviation_bounds",
        json!({"upper": avg + 2.0 * std_deviation, "lower": avg - 2.0 * std_deviation}),
    );
    json!(stats)
}
