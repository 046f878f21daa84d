use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Suffix that turns a filter term into a range filter (`age__range=10..20`).
pub const RANGE_SUFFIX: &str = "__range";

/// Caller filter terms after key normalization. Values may be comma
/// delimited, meaning "match any of".
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct FilterTerms(pub BTreeMap<String, String>);

impl FilterTerms {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut out = BTreeMap::new();
        for (k, v) in pairs {
            out.insert(normalize_key(k.as_ref()), v.into());
        }
        Self(out)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'de> Deserialize<'de> for FilterTerms {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        // values arrive as strings or bare JSON scalars
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(d)?;
        Ok(Self::from_pairs(raw.into_iter().map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })))
    }
}

/// Canonical key form used everywhere past the request boundary.
pub fn normalize_key(key: &str) -> String {
    key.trim().trim_start_matches(':').to_string()
}

/// Splits a comma-delimited term value, dropping empty segments.
pub fn split_values(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Stats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    /// Parses `field` or `field:asc|desc`. Unknown directions yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (field, order) = match raw.split_once(':') {
            Some((f, o)) => {
                let order = match o.trim().to_ascii_lowercase().as_str() {
                    "asc" | "" => SortOrder::Asc,
                    "desc" => SortOrder::Desc,
                    _ => return None,
                };
                (f.trim(), order)
            }
            None => (raw, SortOrder::Asc),
        };
        if field.is_empty() {
            return None;
        }
        Some(Self {
            field: normalize_key(field),
            order,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Recognized search options. Unrecognized keys are ignored on input.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct QueryOptions {
    #[serde(deserialize_with = "opt_string_list")]
    pub fields: Option<Vec<String>>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    #[serde(deserialize_with = "sort_list")]
    pub sort: Vec<SortSpec>,
    pub distance: Option<String>,
    pub zip: Option<String>,
    /// Explicit anchor, used when no `zip` is given.
    pub location: Option<GeoPoint>,
    pub command: Option<Command>,
    #[serde(deserialize_with = "string_list")]
    pub metrics: Vec<String>,
    pub keys_nested: bool,
    pub endpoint: Option<String>,
    pub index: Option<String>,
    pub debug: bool,
}

impl QueryOptions {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// Offset of the first hit on the requested page, `None` when it
    /// does not fit in a `u64`.
    pub fn offset(&self) -> Option<u64> {
        (self.page() - 1).checked_mul(self.per_page())
    }

    pub fn is_stats(&self) -> bool {
        self.command == Some(Command::Stats)
    }

    /// Requested projection with keys normalized, or `None` for full documents.
    pub fn projection(&self) -> Option<Vec<String>> {
        self.fields
            .as_ref()
            .filter(|f| !f.is_empty())
            .map(|f| f.iter().map(|s| normalize_key(s)).collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(String),
    Many(Vec<T>),
}

fn string_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany<String>>::deserialize(d)? {
        Some(OneOrMany::One(s)) => split_values(&s).into_iter().map(String::from).collect(),
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

fn opt_string_list<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<String>>, D::Error> {
    string_list(d).map(|v| Some(v).filter(|v| !v.is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SortItem {
    Raw(String),
    Spec(SortSpec),
}

fn sort_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<SortSpec>, D::Error> {
    let items = match Option::<OneOrMany<SortItem>>::deserialize(d)? {
        Some(OneOrMany::One(s)) => split_values(&s)
            .into_iter()
            .map(|p| SortItem::Raw(p.to_string()))
            .collect(),
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    };
    items
        .into_iter()
        .map(|item| match item {
            SortItem::Spec(s) => Ok(s),
            SortItem::Raw(r) => SortSpec::parse(&r)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid sort '{}'", r))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_normalized_once_at_the_boundary() {
        let terms = FilterTerms::from_pairs([(":name", "Paul"), (" city ", "Liverpool")]);
        assert_eq!(terms.get("name"), Some("Paul"));
        assert_eq!(terms.get(":city"), Some("Liverpool"));
        assert_eq!(terms.0.len(), 2);
    }

    #[test]
    fn comma_values_drop_empty_segments() {
        assert_eq!(
            split_values("8175133,3792621,2695598,"),
            vec!["8175133", "3792621", "2695598"]
        );
        assert!(split_values(",").is_empty());
    }

    #[test]
    fn per_page_is_clamped_and_page_defaults() {
        let mut o = QueryOptions::default();
        assert_eq!(o.page(), 1);
        assert_eq!(o.per_page(), DEFAULT_PAGE_SIZE);
        o.per_page = Some(500);
        assert_eq!(o.per_page(), MAX_PAGE_SIZE);
        o.per_page = Some(0);
        assert_eq!(o.per_page(), 1);
    }

    #[test]
    fn sort_spec_parses_direction() {
        assert_eq!(
            SortSpec::parse("population:desc"),
            Some(SortSpec {
                field: "population".into(),
                order: SortOrder::Desc
            })
        );
        assert_eq!(SortSpec::parse("name").map(|s| s.order), Some(SortOrder::Asc));
        assert_eq!(SortSpec::parse("name:sideways"), None);
    }

    #[test]
    fn options_ignore_unknown_keys() {
        let o: QueryOptions = serde_json::from_value(serde_json::json!({
            "fields": ["age"],
            "per_page": 5,
            "command": "stats",
            "frobnicate": true
        }))
        .unwrap();
        assert!(o.is_stats());
        assert_eq!(o.per_page(), 5);
        assert_eq!(o.projection(), Some(vec!["age".to_string()]));
    }

    #[test]
    fn options_accept_comma_strings() {
        let o: QueryOptions = serde_json::from_value(serde_json::json!({
            "fields": "name,state",
            "sort": "population:desc,name",
            "metrics": ["max"]
        }))
        .unwrap();
        assert_eq!(o.fields, Some(vec!["name".to_string(), "state".to_string()]));
        assert_eq!(o.sort.len(), 2);
        assert_eq!(o.sort[0].order, SortOrder::Desc);
        assert_eq!(o.metrics, vec!["max".to_string()]);
    }

    #[test]
    fn null_lists_mean_unset() {
        let o: QueryOptions = serde_json::from_value(serde_json::json!({
            "fields": null,
            "sort": null,
            "metrics": null
        }))
        .unwrap();
        assert_eq!(o, QueryOptions::default());
        assert_eq!(o.projection(), None);

        let o: QueryOptions =
            serde_json::from_value(serde_json::json!({"fields": []})).unwrap();
        assert_eq!(o.fields, None);
    }

    #[test]
    fn json_terms_accept_scalars() {
        let t: FilterTerms =
            serde_json::from_value(serde_json::json!({"id": 11, ":name": "Marilyn"})).unwrap();
        assert_eq!(t.get("id"), Some("11"));
        assert_eq!(t.get("name"), Some("Marilyn"));
    }
}
