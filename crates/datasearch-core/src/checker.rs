//! Request validation, run before any translation happens.

use crate::dictionary::FieldDictionary;
use crate::model::{split_values, FilterTerms, QueryOptions, RANGE_SUFFIX};
use crate::query::parse_range;
use crate::ValidationIssue;

const DISTANCE_UNITS: &[&str] = &["mi", "km", "m", "yd", "ft"];

/// Splits `100mi` into its magnitude and unit.
pub fn parse_distance(raw: &str) -> Option<(f64, &str)> {
    let raw = raw.trim();
    let split = raw.find(|c: char| c.is_ascii_alphabetic())?;
    let (num, unit) = raw.split_at(split);
    let magnitude = num.trim().parse::<f64>().ok()?;
    (magnitude >= 0.0 && DISTANCE_UNITS.contains(&unit)).then_some((magnitude, unit))
}

pub fn validate(
    terms: &FilterTerms,
    options: &QueryOptions,
    dictionary: &dyn FieldDictionary,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for (key, raw) in terms.iter() {
        if key.is_empty() {
            issues.push(ValidationIssue::new(key, "empty filter key"));
            continue;
        }
        if let Some(base) = key.strip_suffix(RANGE_SUFFIX) {
            let resolved = dictionary.resolve(base);
            match parse_range(raw, resolved.field_type) {
                None => issues.push(ValidationIssue::new(
                    key,
                    format!("range '{}' must look like lo..hi", raw),
                )),
                Some((lo, hi)) if resolved.field_type.is_numeric() => {
                    if [lo, hi].iter().flatten().any(|v| !v.is_number()) {
                        issues.push(ValidationIssue::new(key, "range bounds must be numeric"));
                    }
                }
                Some(_) => {}
            }
            continue;
        }
        let resolved = dictionary.resolve(key);
        if resolved.field_type.is_numeric() {
            for v in split_values(raw) {
                if v.parse::<f64>().is_err() {
                    issues.push(ValidationIssue::new(
                        key,
                        format!("'{}' is not a number", v),
                    ));
                }
            }
        }
    }

    if options.page == Some(0) {
        issues.push(ValidationIssue::new("page", "page numbers start at 1"));
    } else if options.offset().is_none() {
        issues.push(ValidationIssue::new("page", "page is out of range for per_page"));
    }
    if options.per_page == Some(0) {
        issues.push(ValidationIssue::new("per_page", "per_page must be at least 1"));
    }

    if let Some(distance) = options.distance.as_deref() {
        if parse_distance(distance).is_none() {
            issues.push(ValidationIssue::new(
                "distance",
                format!(
                    "'{}' must be a number followed by one of {}",
                    distance,
                    DISTANCE_UNITS.join(", ")
                ),
            ));
        }
        match options.zip.as_deref() {
            Some(zip) if dictionary.zip_location(zip).is_none() => {
                issues.push(ValidationIssue::new("zip", format!("unknown zip '{}'", zip)));
            }
            _ => {}
        }
    }

    if !options.metrics.is_empty() && !options.is_stats() {
        issues.push(ValidationIssue::new(
            "metrics",
            "metrics only apply to the stats command",
        ));
    }
    if options.is_stats() && options.fields.as_ref().map_or(true, Vec::is_empty) {
        issues.push(ValidationIssue::new(
            "fields",
            "the stats command needs at least one field",
        ));
    }

    issues
}
