//! Flat key/value input (query strings, CLI arguments) split into filter
//! terms and search options.

use crate::model::{
    normalize_key, split_values, Command, FilterTerms, GeoPoint, QueryOptions, SortSpec,
};
use crate::{Result, SearchError, ValidationIssue};

pub const OPTION_KEYS: &[&str] = &[
    "fields",
    "page",
    "per_page",
    "sort",
    "distance",
    "zip",
    "location",
    "command",
    "metrics",
    "keys_nested",
    "endpoint",
    "index",
    "debug",
];

pub fn is_option_key(key: &str) -> bool {
    OPTION_KEYS.contains(&key)
}

/// Recognized option keys become `QueryOptions`, everything else is a
/// filter term. Later duplicates override earlier ones.
pub fn split_params<K, V, I>(pairs: I) -> Result<(FilterTerms, QueryOptions)>
where
    K: AsRef<str>,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut terms = Vec::new();
    let mut options = QueryOptions::default();
    let mut issues = Vec::new();

    for (k, v) in pairs {
        let key = normalize_key(k.as_ref());
        let value = v.as_ref().trim();
        if !is_option_key(&key) {
            terms.push((key, value.to_string()));
            continue;
        }
        match key.as_str() {
            "fields" => options.fields = Some(owned_list(value)).filter(|f| !f.is_empty()),
            "metrics" => options.metrics = owned_list(value),
            "page" => options.page = parse_u64(&key, value, &mut issues),
            "per_page" => options.per_page = parse_u64(&key, value, &mut issues),
            "sort" => {
                options.sort.clear();
                for part in split_values(value) {
                    match SortSpec::parse(part) {
                        Some(s) => options.sort.push(s),
                        None => issues.push(ValidationIssue::new(
                            &key,
                            format!("sort '{}' must be field:asc or field:desc", part),
                        )),
                    }
                }
            }
            "distance" => options.distance = non_empty(value),
            "zip" => options.zip = non_empty(value),
            "location" => match parse_point(value) {
                Some(p) => options.location = Some(p),
                None => issues.push(ValidationIssue::new(&key, "location must be lat,lon")),
            },
            "command" => match value.to_ascii_lowercase().as_str() {
                "stats" => options.command = Some(Command::Stats),
                "" => options.command = None,
                other => issues.push(ValidationIssue::new(
                    &key,
                    format!("unknown command '{}'", other),
                )),
            },
            "keys_nested" => options.keys_nested = parse_bool(&key, value, &mut issues),
            "debug" => options.debug = parse_bool(&key, value, &mut issues),
            "endpoint" => options.endpoint = non_empty(value),
            "index" => options.index = non_empty(value),
            _ => {}
        }
    }

    if !issues.is_empty() {
        return Err(SearchError::Validation(issues));
    }
    Ok((FilterTerms::from_pairs(terms), options))
}

fn owned_list(value: &str) -> Vec<String> {
    split_values(value).into_iter().map(String::from).collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_u64(key: &str, value: &str, issues: &mut Vec<ValidationIssue>) -> Option<u64> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            issues.push(ValidationIssue::new(
                key,
                format!("'{}' is not a non-negative integer", value),
            ));
            None
        }
    }
}

fn parse_bool(key: &str, value: &str, issues: &mut Vec<ValidationIssue>) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            issues.push(ValidationIssue::new(key, "expected a boolean"));
            false
        }
    }
}

fn parse_point(value: &str) -> Option<GeoPoint> {
    let (lat, lon) = value.split_once(',')?;
    Some(GeoPoint {
        lat: lat.trim().parse().ok()?,
        lon: lon.trim().parse().ok()?,
    })
}
