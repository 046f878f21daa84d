use crate::model::GeoPoint;
use crate::paths::set_path;
use crate::{Result, SearchError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Default geo field, always present in generated mappings.
pub const LOCATION_FIELD: &str = "location";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Literal,
    Name,
    LowercaseName,
    Autocomplete,
    Integer,
    Float,
    LatLon,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    /// Backend mapping fragment for this type.
    pub fn mapping(self) -> Value {
        match self {
            FieldType::Literal | FieldType::Name => {
                json!({"type": "string", "index": "not_analyzed"})
            }
            FieldType::LowercaseName => {
                json!({"type": "string", "index": "not_analyzed", "store": false})
            }
            FieldType::Autocomplete => json!({
                "type": "string",
                "analyzer": "autocomplete_index",
                "search_analyzer": "autocomplete_search"
            }),
            FieldType::LatLon => json!({"type": "geo_point", "lat_lon": true, "store": true}),
            FieldType::String => json!({"type": "string"}),
            FieldType::Integer => json!({"type": "integer"}),
            FieldType::Float => json!({"type": "float"}),
        }
    }
}

/// A logical field name resolved against the dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub path: String,
    pub field_type: FieldType,
    /// Enclosing nested-document path, when the field lives under one.
    pub nested_path: Option<String>,
}

impl ResolvedField {
    pub fn is_nested(&self) -> bool {
        self.nested_path.is_some()
    }
}

pub trait FieldDictionary: Send + Sync {
    /// Resolves a logical name. Total: unknown names map onto themselves.
    fn resolve(&self, name: &str) -> ResolvedField;
    fn all_endpoints(&self) -> Vec<String>;
    /// Scoped backend index for an api endpoint.
    fn index_name_for(&self, endpoint: &str) -> Option<String>;
    fn default_index(&self) -> String;
    /// Scoped form of an explicit index name.
    fn scoped_index_name(&self, index: &str) -> String;
    fn location_field(&self) -> String;
    fn zip_location(&self, zip: &str) -> Option<GeoPoint>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldSpec {
    Source(String),
    Typed {
        #[serde(default)]
        source: Option<String>,
        #[serde(default, rename = "type")]
        field_type: FieldType,
    },
}

impl FieldSpec {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldSpec::Source(_) => FieldType::String,
            FieldSpec::Typed { field_type, .. } => *field_type,
        }
    }
}

/// Data descriptor: dataset naming, field dictionary and nested paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryConfig {
    pub index: String,
    #[serde(default)]
    pub api: Option<String>,
    /// Extra api endpoints beyond `api`, mapped to their index names.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub index_prefix: Option<String>,
    /// Backend field path -> field spec.
    #[serde(default)]
    pub dictionary: BTreeMap<String, FieldSpec>,
    /// Object paths stored as nested documents.
    #[serde(default)]
    pub nested: Vec<String>,
    #[serde(default)]
    pub zipcodes: BTreeMap<String, GeoPoint>,
    #[serde(default = "default_shards")]
    pub number_of_shards: u32,
    #[serde(default = "default_replicas")]
    pub number_of_replicas: u32,
}

fn default_shards() -> u32 {
    3
}

fn default_replicas() -> u32 {
    2
}

/// Index settings declaring the analyzers autocomplete fields refer to.
fn index_settings(shards: u32, replicas: u32) -> Value {
    json!({
        "number_of_shards": shards,
        "number_of_replicas": replicas,
        "analysis": {
            "filter": {
                "autocomplete_filter": {
                    "type": "edge_ngram",
                    "min_gram": 1,
                    "max_gram": 25
                },
                "autocomplete_word_delimiter": {
                    "type": "word_delimiter",
                    "preserve_original": true,
                    "split_on_case_change": false,
                    "split_on_numerics": false,
                    "stem_english_possessive": false
                }
            },
            "analyzer": {
                "autocomplete_index": {
                    "type": "custom",
                    "tokenizer": "whitespace",
                    "filter": ["lowercase", "autocomplete_word_delimiter", "autocomplete_filter"]
                },
                "autocomplete_search": {
                    "type": "custom",
                    "tokenizer": "whitespace",
                    "filter": ["lowercase", "autocomplete_word_delimiter"]
                }
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    config: DictionaryConfig,
}

impl Dictionary {
    pub fn new(mut config: DictionaryConfig) -> Self {
        // longest nested path first so the innermost one wins in resolve
        config.nested.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { config }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: DictionaryConfig =
            serde_json::from_str(raw).map_err(|e| SearchError::Dictionary(e.to_string()))?;
        if config.index.trim().is_empty() {
            return Err(SearchError::Dictionary("descriptor has no index".into()));
        }
        Ok(Self::new(config))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SearchError::Dictionary(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn config(&self) -> &DictionaryConfig {
        &self.config
    }

    pub fn nested_paths(&self) -> &[String] {
        &self.config.nested
    }

    /// Builds the backend index mapping: dotted paths become a `properties`
    /// tree, nested paths are typed `nested` and included in the parent.
    pub fn mapping(&self) -> Value {
        let mut tree = Map::new();
        for (path, spec) in &self.config.dictionary {
            set_path(&mut tree, path, spec.field_type().mapping());
        }
        if !tree.contains_key(LOCATION_FIELD) {
            tree.insert(LOCATION_FIELD.into(), FieldType::LatLon.mapping());
        }
        let properties = self.properties(tree, "");
        json!({
            "settings": index_settings(self.config.number_of_shards, self.config.number_of_replicas),
            "mappings": { "document": { "properties": properties } }
        })
    }

    fn properties(&self, tree: Map<String, Value>, root: &str) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in tree {
            let dotted = format!("{}{}", root, key);
            let is_leaf = value.get("type").map(Value::is_string).unwrap_or(false);
            match value {
                Value::Object(children) if !is_leaf => {
                    let nested = self.config.nested.iter().any(|n| n == &dotted);
                    let mut entry = Map::new();
                    entry.insert(
                        "type".into(),
                        Value::String(if nested { "nested" } else { "object" }.into()),
                    );
                    entry.insert(
                        "properties".into(),
                        Value::Object(self.properties(children, &format!("{}.", dotted))),
                    );
                    if nested {
                        entry.insert("include_in_parent".into(), Value::Bool(true));
                    }
                    out.insert(key, Value::Object(entry));
                }
                leaf => {
                    out.insert(key, leaf);
                }
            }
        }
        out
    }

    fn scope(&self, index: &str) -> String {
        match self.config.index_prefix.as_deref() {
            Some(p) if !p.is_empty() => format!("{}-{}", p, index),
            _ => index.to_string(),
        }
    }
}

impl FieldDictionary for Dictionary {
    fn resolve(&self, name: &str) -> ResolvedField {
        let field_type = self
            .config
            .dictionary
            .get(name)
            .map(FieldSpec::field_type)
            .unwrap_or_default();
        let nested_path = self
            .config
            .nested
            .iter()
            .find(|n| crate::paths::strip_prefix(name, n).is_some())
            .cloned();
        ResolvedField {
            path: name.to_string(),
            field_type,
            nested_path,
        }
    }

    fn all_endpoints(&self) -> Vec<String> {
        let mut out: Vec<String> = self.config.api.iter().cloned().collect();
        out.extend(self.config.endpoints.keys().cloned());
        out.sort();
        out.dedup();
        out
    }

    fn index_name_for(&self, endpoint: &str) -> Option<String> {
        if self.config.api.as_deref() == Some(endpoint) {
            return Some(self.scope(&self.config.index));
        }
        self.config.endpoints.get(endpoint).map(|i| self.scope(i))
    }

    fn default_index(&self) -> String {
        self.scope(&self.config.index)
    }

    fn scoped_index_name(&self, index: &str) -> String {
        self.scope(index)
    }

    fn location_field(&self) -> String {
        self.config
            .dictionary
            .iter()
            .find(|(_, spec)| spec.field_type() == FieldType::LatLon)
            .map(|(path, _)| path.clone())
            .unwrap_or_else(|| LOCATION_FIELD.to_string())
    }

    fn zip_location(&self, zip: &str) -> Option<GeoPoint> {
        self.config.zipcodes.get(zip.trim()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schools() -> Dictionary {
        Dictionary::from_json(
            r#"{
                "index": "schools",
                "api": "schools",
                "endpoints": {"cities": "city-data"},
                "index_prefix": "test",
                "dictionary": {
                    "name": "NAME",
                    "id": {"source": "ID", "type": "integer"},
                    "2012.sat_average": {"source": "SAT", "type": "float"},
                    "latest.programs.title": {"source": "CIP", "type": "literal"},
                    "latest.programs.median_debt": {"source": "DEBT", "type": "integer"}
                },
                "nested": ["latest.programs"],
                "zipcodes": {"94102": {"lat": 37.7793, "lon": -122.4193}}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_types_and_nested_paths() {
        let d = schools();
        let id = d.resolve("id");
        assert_eq!(id.field_type, FieldType::Integer);
        assert!(!id.is_nested());
        let title = d.resolve("latest.programs.title");
        assert_eq!(title.nested_path.as_deref(), Some("latest.programs"));
        let unknown = d.resolve("state");
        assert_eq!(unknown.path, "state");
        assert_eq!(unknown.field_type, FieldType::String);
    }

    #[test]
    fn endpoints_are_scoped() {
        let d = schools();
        assert_eq!(d.all_endpoints(), vec!["cities".to_string(), "schools".to_string()]);
        assert_eq!(d.index_name_for("cities").as_deref(), Some("test-city-data"));
        assert_eq!(d.index_name_for("schools").as_deref(), Some("test-schools"));
        assert_eq!(d.index_name_for("nope"), None);
        assert_eq!(d.default_index(), "test-schools");
    }

    #[test]
    fn mapping_marks_nested_objects() {
        let m = schools().mapping();
        let props = &m["mappings"]["document"]["properties"];
        assert_eq!(props["latest"]["type"], "object");
        let programs = &props["latest"]["properties"]["programs"];
        assert_eq!(programs["type"], "nested");
        assert_eq!(programs["include_in_parent"], true);
        assert_eq!(programs["properties"]["title"]["index"], "not_analyzed");
        assert_eq!(props["2012"]["properties"]["sat_average"]["type"], "float");
        assert_eq!(props["location"]["type"], "geo_point");
    }

    #[test]
    fn mapping_declares_autocomplete_analyzers() {
        let d = Dictionary::from_json(
            r#"{"index": "cities", "number_of_replicas": 0,
                "dictionary": {"name": {"source": "NAME", "type": "autocomplete"}}}"#,
        )
        .unwrap();
        let m = d.mapping();
        let name = &m["mappings"]["document"]["properties"]["name"];
        let analyzers = &m["settings"]["analysis"]["analyzer"];
        for key in ["analyzer", "search_analyzer"] {
            let analyzer = name[key].as_str().unwrap();
            assert_eq!(analyzers[analyzer]["type"], "custom");
        }
        assert_eq!(
            m["settings"]["analysis"]["filter"]["autocomplete_filter"]["type"],
            "edge_ngram"
        );
        assert_eq!(m["settings"]["number_of_shards"], 3);
        assert_eq!(m["settings"]["number_of_replicas"], 0);
    }

    #[test]
    fn zip_anchor_lookup() {
        let d = schools();
        assert!(d.zip_location("94102").is_some());
        assert!(d.zip_location("00000").is_none());
        assert_eq!(d.location_field(), "location");
    }

    #[test]
    fn descriptor_without_index_is_rejected() {
        assert!(matches!(
            Dictionary::from_json(r#"{"index": ""}"#),
            Err(SearchError::Dictionary(_))
        ));
    }
}
