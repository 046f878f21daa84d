use crate::dictionary::{FieldDictionary, FieldType, ResolvedField};
use crate::model::{split_values, FilterTerms, GeoPoint, QueryOptions, SortOrder, RANGE_SUFFIX};
use crate::{Result, SearchError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterClause {
    Term {
        field: String,
        value: Value,
    },
    /// Matches when the field equals any of the values.
    Terms {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    GeoDistance {
        field: String,
        distance: String,
        point: GeoPoint,
    },
}

impl FilterClause {
    pub fn field(&self) -> &str {
        match self {
            FilterClause::Term { field, .. }
            | FilterClause::Terms { field, .. }
            | FilterClause::Range { field, .. }
            | FilterClause::GeoDistance { field, .. } => field,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FilterClause::Term { field, value } => json!({ "term": { field: value } }),
            FilterClause::Terms { field, values } => json!({ "terms": { field: values } }),
            FilterClause::Range { field, gte, lte } => {
                let mut bounds = Map::new();
                if let Some(v) = gte {
                    bounds.insert("gte".into(), v.clone());
                }
                if let Some(v) = lte {
                    bounds.insert("lte".into(), v.clone());
                }
                json!({ "range": { field: bounds } })
            }
            FilterClause::GeoDistance {
                field,
                distance,
                point,
            } => json!({
                "geo_distance": { "distance": distance, field: { "lat": point.lat, "lon": point.lon } }
            }),
        }
    }

    // single-value terms inside a nested clause are sent as `match`
    fn to_nested_json(&self) -> Value {
        match self {
            FilterClause::Term { field, value } => json!({ "match": { field: value } }),
            other => other.to_json(),
        }
    }
}

/// Filter scoped to one nested-document path. Matching children come back
/// as inner hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedFilter {
    pub path: String,
    pub clauses: Vec<FilterClause>,
}

impl NestedFilter {
    pub fn match_fields(&self) -> Vec<&str> {
        self.clauses.iter().map(FilterClause::field).collect()
    }

    pub fn to_json(&self) -> Value {
        let must: Vec<Value> = self.clauses.iter().map(FilterClause::to_nested_json).collect();
        json!({
            "nested": {
                "path": self.path,
                "query": { "bool": { "must": must } },
                "inner_hits": {}
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortClause {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    ExtendedStats { field: String },
}

/// Translated request handed to a search backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub filters: Vec<FilterClause>,
    pub nested: Option<NestedFilter>,
    /// Requested projection (backend paths), `None` for full documents.
    pub fields: Option<Vec<String>>,
    /// Projected paths living under a nested path; these can only be read
    /// back from `_source`.
    pub source_fields: Vec<String>,
    pub from: u64,
    pub size: u64,
    pub sort: Vec<SortClause>,
    pub aggregations: BTreeMap<String, Aggregation>,
    /// Stats requests only count and aggregate; no hits are fetched.
    pub count_only: bool,
}

impl SearchRequest {
    pub fn has_nested(&self) -> bool {
        self.nested.is_some()
    }

    pub fn has_projection(&self) -> bool {
        self.fields.is_some()
    }

    /// Projected paths the backend returns through its flat `fields` map.
    pub fn flat_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .flatten()
            .filter(|f| !self.source_fields.contains(*f))
            .map(String::as_str)
            .collect()
    }

    /// Renders the backend JSON body.
    pub fn to_body(&self) -> Value {
        let mut filter: Vec<Value> = self.filters.iter().map(FilterClause::to_json).collect();
        if let Some(n) = &self.nested {
            filter.push(n.to_json());
        }
        let query = if filter.is_empty() {
            json!({ "match_all": {} })
        } else {
            json!({ "bool": { "filter": filter } })
        };
        let mut body = Map::new();
        body.insert("query".into(), query);
        if self.fields.is_some() {
            body.insert("fields".into(), json!(self.flat_fields()));
            body.insert(
                "_source".into(),
                if self.source_fields.is_empty() {
                    Value::Bool(false)
                } else {
                    json!({ "includes": self.source_fields })
                },
            );
        }
        body.insert("from".into(), json!(self.from));
        body.insert(
            "size".into(),
            json!(if self.count_only { 0 } else { self.size }),
        );
        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| json!({ &s.field: { "order": s.order } }))
                .collect();
            body.insert("sort".into(), Value::Array(sort));
        }
        if !self.aggregations.is_empty() {
            let mut aggs = Map::new();
            for (name, agg) in &self.aggregations {
                let Aggregation::ExtendedStats { field } = agg;
                aggs.insert(name.clone(), json!({ "extended_stats": { "field": field } }));
            }
            body.insert("aggs".into(), Value::Object(aggs));
        }
        Value::Object(body)
    }
}

/// Converts a raw term value into a typed backend value. Numeric paths are
/// compared as numbers; anything unparseable stays a string.
pub fn typed_value(raw: &str, field_type: FieldType) -> Value {
    let raw = raw.trim();
    match field_type {
        FieldType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldType::Float => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// Splits `lo..hi` (either side optional) into typed bounds.
pub fn parse_range(raw: &str, field_type: FieldType) -> Option<(Option<Value>, Option<Value>)> {
    let (lo, hi) = raw.split_once("..")?;
    let bound = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| typed_value(s, field_type))
    };
    Some((bound(lo), bound(hi)))
}

fn term_clause(resolved: &ResolvedField, raw: &str) -> Option<FilterClause> {
    let mut values: Vec<Value> = split_values(raw)
        .into_iter()
        .map(|v| typed_value(v, resolved.field_type))
        .collect();
    match values.len() {
        0 => None,
        1 => Some(FilterClause::Term {
            field: resolved.path.clone(),
            value: values.remove(0),
        }),
        _ => Some(FilterClause::Terms {
            field: resolved.path.clone(),
            values,
        }),
    }
}

/// Resolves the geo anchor from `zip` (via the dictionary) or an explicit
/// location. Either key missing disables the geo filter.
fn geo_clause(options: &QueryOptions, dictionary: &dyn FieldDictionary) -> Option<FilterClause> {
    let distance = options.distance.as_deref()?.trim();
    if distance.is_empty() {
        return None;
    }
    let point = match options.zip.as_deref() {
        Some(zip) => dictionary.zip_location(zip)?,
        None => options.location?,
    };
    Some(FilterClause::GeoDistance {
        field: dictionary.location_field(),
        distance: distance.to_string(),
        point,
    })
}

/// Translates caller terms and options into a structured request. Pure; the
/// only failure is terms spanning more than one nested path.
pub fn build(
    terms: &FilterTerms,
    options: &QueryOptions,
    dictionary: &dyn FieldDictionary,
) -> Result<SearchRequest> {
    let mut filters = Vec::new();
    let mut nested: Option<NestedFilter> = None;

    for (key, raw) in terms.iter() {
        let (resolved, clause) = match key.strip_suffix(RANGE_SUFFIX) {
            Some(base) => {
                let resolved = dictionary.resolve(base);
                let clause = parse_range(raw, resolved.field_type).map(|(gte, lte)| {
                    FilterClause::Range {
                        field: resolved.path.clone(),
                        gte,
                        lte,
                    }
                });
                (resolved, clause)
            }
            None => {
                let resolved = dictionary.resolve(key);
                let clause = term_clause(&resolved, raw);
                (resolved, clause)
            }
        };
        let Some(clause) = clause else { continue };
        match resolved.nested_path {
            Some(path) => {
                if let Some(n) = nested.as_ref().filter(|n| n.path != path) {
                    return Err(SearchError::Unsupported(format!(
                        "terms span nested paths '{}' and '{}'",
                        n.path, path
                    )));
                }
                nested
                    .get_or_insert_with(|| NestedFilter {
                        path,
                        clauses: Vec::new(),
                    })
                    .clauses
                    .push(clause);
            }
            None => filters.push(clause),
        }
    }

    if let Some(geo) = geo_clause(options, dictionary) {
        filters.push(geo);
    }

    let fields = options.projection();
    let mut source_fields = Vec::new();
    let mut aggregations = BTreeMap::new();
    for name in fields.iter().flatten() {
        let resolved = dictionary.resolve(name);
        if resolved.is_nested() {
            source_fields.push(resolved.path.clone());
        }
        if options.is_stats() && resolved.field_type.is_numeric() {
            aggregations.insert(
                name.clone(),
                Aggregation::ExtendedStats {
                    field: resolved.path.clone(),
                },
            );
        }
    }

    let sort = options
        .sort
        .iter()
        .map(|s| SortClause {
            field: dictionary.resolve(&s.field).path,
            order: s.order,
        })
        .collect();

    let size = options.per_page();
    Ok(SearchRequest {
        filters,
        nested,
        fields,
        source_fields,
        from: options.offset().unwrap_or(u64::MAX),
        size,
        sort,
        aggregations,
        count_only: options.is_stats(),
    })
}

/// Picks the backend index for a request. `endpoint` wins over `index`.
pub fn resolve_index(options: &QueryOptions, dictionary: &dyn FieldDictionary) -> Result<String> {
    if options.endpoint.is_some() && options.index.is_some() {
        tracing::warn!("search options carry both endpoint and index; endpoint wins");
    }
    if let Some(endpoint) = options.endpoint.as_deref() {
        return dictionary
            .index_name_for(endpoint)
            .ok_or_else(|| SearchError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
                available: dictionary.all_endpoints(),
            });
    }
    Ok(match options.index.as_deref() {
        Some(index) => dictionary.scoped_index_name(index),
        None => dictionary.default_index(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use crate::model::SortSpec;

    fn dict() -> Dictionary {
        Dictionary::from_json(
            r#"{
                "index": "city-data",
                "api": "cities",
                "dictionary": {
                    "name": {"source": "NAME", "type": "literal"},
                    "population": {"source": "POP", "type": "integer"},
                    "age": {"type": "integer"},
                    "height": {"type": "float"},
                    "address": "ADDRESS",
                    "latest.programs.title": {"type": "literal"},
                    "latest.programs.code": {"type": "integer"},
                    "latest.sites.name": "SITE"
                },
                "nested": ["latest.programs", "latest.sites"],
                "zipcodes": {"94102": {"lat": 37.7793, "lon": -122.4193}}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn single_and_multi_value_terms() {
        let terms = FilterTerms::from_pairs([("name", "Paul,Marilyn"), ("city", "Boston")]);
        let req = build(&terms, &QueryOptions::default(), &dict()).unwrap();
        assert_eq!(
            req.filters,
            vec![
                FilterClause::Term {
                    field: "city".into(),
                    value: json!("Boston")
                },
                FilterClause::Terms {
                    field: "name".into(),
                    values: vec![json!("Paul"), json!("Marilyn")]
                },
            ]
        );
        assert!(req.nested.is_none());
    }

    #[test]
    fn numeric_paths_compare_as_numbers() {
        let terms = FilterTerms::from_pairs([("population", "8175133,3792621,")]);
        let req = build(&terms, &QueryOptions::default(), &dict()).unwrap();
        assert_eq!(
            req.filters[0],
            FilterClause::Terms {
                field: "population".into(),
                values: vec![json!(8175133), json!(3792621)]
            }
        );
    }

    #[test]
    fn nested_terms_share_one_nested_clause() {
        let terms = FilterTerms::from_pairs([
            ("latest.programs.title", "Law"),
            ("latest.programs.code", "22"),
            ("name", "Central"),
        ]);
        let req = build(&terms, &QueryOptions::default(), &dict()).unwrap();
        let nested = req.nested.as_ref().unwrap();
        assert_eq!(nested.path, "latest.programs");
        assert_eq!(
            nested.match_fields(),
            vec!["latest.programs.code", "latest.programs.title"]
        );
        assert_eq!(req.filters.len(), 1);
        let body = req.to_body();
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter[1]["nested"]["path"], "latest.programs");
        assert_eq!(
            filter[1]["nested"]["query"]["bool"]["must"][0]["match"]["latest.programs.code"],
            22
        );
        assert!(filter[1]["nested"]["inner_hits"].is_object());
    }

    #[test]
    fn two_nested_paths_are_unsupported() {
        let terms = FilterTerms::from_pairs([
            ("latest.programs.title", "Law"),
            ("latest.sites.name", "Main"),
        ]);
        let err = build(&terms, &QueryOptions::default(), &dict()).unwrap_err();
        assert!(matches!(err, SearchError::Unsupported(_)));
    }

    #[test]
    fn pagination_offsets_and_clamps() {
        let opts = QueryOptions {
            page: Some(3),
            per_page: Some(250),
            ..Default::default()
        };
        let req = build(&FilterTerms::default(), &opts, &dict()).unwrap();
        assert_eq!(req.size, 100);
        assert_eq!(req.from, 200);
        let body = req.to_body();
        assert_eq!(body["size"], 100);
        assert_eq!(body["query"], json!({"match_all": {}}));
    }

    #[test]
    fn projection_splits_flat_and_source_fields() {
        let opts = QueryOptions {
            fields: Some(vec!["name".into(), "latest.programs.title".into()]),
            ..Default::default()
        };
        let req = build(&FilterTerms::default(), &opts, &dict()).unwrap();
        assert_eq!(req.flat_fields(), vec!["name"]);
        assert_eq!(req.source_fields, vec!["latest.programs.title".to_string()]);
        let body = req.to_body();
        assert_eq!(body["fields"], json!(["name"]));
        assert_eq!(body["_source"], json!({"includes": ["latest.programs.title"]}));
    }

    #[test]
    fn stats_aggregates_numeric_fields_only() {
        let opts = QueryOptions {
            fields: Some(vec!["age".into(), "height".into(), "address".into()]),
            command: Some(crate::model::Command::Stats),
            ..Default::default()
        };
        let req = build(&FilterTerms::default(), &opts, &dict()).unwrap();
        assert_eq!(
            req.aggregations.keys().collect::<Vec<_>>(),
            vec!["age", "height"]
        );
        assert!(req.count_only);
        let body = req.to_body();
        assert_eq!(body["size"], 0);
        assert_eq!(body["aggs"]["age"]["extended_stats"]["field"], "age");
    }

    #[test]
    fn geo_filter_needs_distance_and_anchor() {
        let mut opts = QueryOptions {
            distance: Some("100mi".into()),
            zip: Some("94102".into()),
            ..Default::default()
        };
        let req = build(&FilterTerms::default(), &opts, &dict()).unwrap();
        assert!(matches!(
            &req.filters[0],
            FilterClause::GeoDistance { field, distance, .. } if field == "location" && distance == "100mi"
        ));
        opts.zip = None;
        let req = build(&FilterTerms::default(), &opts, &dict()).unwrap();
        assert!(req.filters.is_empty());
    }

    #[test]
    fn range_terms_become_range_filters() {
        let terms = FilterTerms::from_pairs([("population__range", "1000..")]);
        let req = build(&terms, &QueryOptions::default(), &dict()).unwrap();
        assert_eq!(
            req.filters[0],
            FilterClause::Range {
                field: "population".into(),
                gte: Some(json!(1000)),
                lte: None
            }
        );
    }

    #[test]
    fn huge_page_saturates_offset() {
        let opts = QueryOptions {
            page: Some(u64::MAX),
            ..Default::default()
        };
        let req = build(&FilterTerms::default(), &opts, &dict()).unwrap();
        assert_eq!(req.from, u64::MAX);
        assert_eq!(req.size, 20);
    }

    #[test]
    fn sort_renders_order() {
        let opts = QueryOptions {
            sort: vec![SortSpec::parse("population:desc").unwrap()],
            ..Default::default()
        };
        let body = build(&FilterTerms::default(), &opts, &dict()).unwrap().to_body();
        assert_eq!(body["sort"], json!([{"population": {"order": "desc"}}]));
    }

    #[test]
    fn index_resolution() {
        let d = dict();
        let mut opts = QueryOptions::default();
        assert_eq!(resolve_index(&opts, &d).unwrap(), "city-data");
        opts.index = Some("other".into());
        assert_eq!(resolve_index(&opts, &d).unwrap(), "other");
        opts.endpoint = Some("cities".into());
        assert_eq!(resolve_index(&opts, &d).unwrap(), "city-data");
        opts.endpoint = Some("towns".into());
        match resolve_index(&opts, &d) {
            Err(SearchError::UnknownEndpoint { endpoint, available }) => {
                assert_eq!(endpoint, "towns");
                assert_eq!(available, vec!["cities".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
