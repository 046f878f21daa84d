use serde_json::{Map, Value};

/// Restricts each aggregated field to the requested metrics. An empty
/// allowlist keeps everything; names that match nothing are ignored.
pub fn filter_aggregations(raw: Map<String, Value>, metrics: &[String]) -> Map<String, Value> {
    if metrics.is_empty() {
        return raw;
    }
    raw.into_iter()
        .map(|(field, values)| {
            let values = match values {
                Value::Object(m) => Value::Object(
                    m.into_iter()
                        .filter(|(metric, _)| metrics.iter().any(|w| w == metric))
                        .collect(),
                ),
                other => other,
            };
            (field, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> Map<String, Value> {
        json!({
            "age": {"count": 2, "min": 14.0, "max": 70.0, "avg": 42.0, "sum": 84.0,
                    "std_deviation_bounds": {"upper": 98.0, "lower": -14.0}},
            "height": {"count": 2, "min": 2.0, "max": 142.0, "avg": 72.0, "sum": 144.0}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn keeps_only_requested_metrics() {
        let out = filter_aggregations(raw(), &["max".into(), "avg".into(), "median".into()]);
        assert_eq!(
            Value::Object(out),
            json!({"age": {"max": 70.0, "avg": 42.0}, "height": {"max": 142.0, "avg": 72.0}})
        );
    }

    #[test]
    fn empty_allowlist_passes_everything() {
        let out = filter_aggregations(raw(), &[]);
        assert_eq!(out, raw());
    }
}
