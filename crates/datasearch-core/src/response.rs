use crate::aggregate::filter_aggregations;
use crate::model::QueryOptions;
use crate::query::SearchRequest;
use crate::reshape::{reshape, KeyFormat};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type Row = Map<String, Value>;

/// Backend search response, reduced to the parts the reshaper reads.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub hits: RawHits,
    #[serde(default)]
    pub aggregations: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawHits {
    #[serde(default, deserialize_with = "hit_total")]
    pub total: u64,
    #[serde(default)]
    pub hits: Vec<RawHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawHit {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Map<String, Value>>,
    /// Flat dotted path -> list of values.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inner_hits: BTreeMap<String, InnerHits>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InnerHits {
    #[serde(default)]
    pub hits: RawHits,
}

// older backends send a bare count, newer ones `{"value": n, "relation": ..}`
fn hit_total<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Total {
        Count(u64),
        Object { value: u64 },
    }
    Ok(match Total::deserialize(d)? {
        Total::Count(n) => n,
        Total::Object { value } => value,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_time: Option<f64>,
    #[serde(rename = "ES_took_ms", default, skip_serializing_if = "Option::is_none")]
    pub es_took_ms: Option<u64>,
}

/// Caller-facing search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultDocument {
    pub metadata: Metadata,
    pub results: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Wall-clock seconds spent on the backend round trip.
    pub search_time: f64,
    pub backend_took_ms: u64,
}

pub fn assemble(
    total: u64,
    request: &SearchRequest,
    results: Vec<Row>,
    aggregations: Option<Map<String, Value>>,
    timing: Option<Timing>,
) -> ResultDocument {
    let size = request.size.max(1);
    ResultDocument {
        metadata: Metadata {
            total,
            page: request.from / size + 1,
            per_page: request.size,
            search_time: timing.map(|t| t.search_time),
            es_took_ms: timing.map(|t| t.backend_took_ms),
        },
        results,
        aggregations,
    }
}

/// Reshapes a raw backend response into the caller document: rows, metrics
/// filtered aggregations for stats, timing when debugging.
pub fn shape_response(
    raw: RawResponse,
    request: &SearchRequest,
    options: &QueryOptions,
    search_time: f64,
) -> ResultDocument {
    let rows = reshape(
        &raw.hits.hits,
        request,
        KeyFormat::from_keys_nested(options.keys_nested),
    );
    let aggregations = options.is_stats().then(|| {
        filter_aggregations(raw.aggregations.unwrap_or_default(), &options.metrics)
    });
    let timing = options.debug.then_some(Timing {
        search_time,
        backend_took_ms: raw.took,
    });
    assemble(raw.hits.total, request, rows, aggregations, timing)
}
