use crate::metrics::BACKEND_SEARCH_SECONDS;
use crate::traits::SearchBackend;
use datasearch_core::{RawResponse, Result, Row, SearchError, SearchRequest};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Bulk loads run long when the process is also indexing.
pub const INDEXING_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Search backend reached over the Elasticsearch REST API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: String,
}

impl HttpBackend {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, index: &str, tail: &str) -> String {
        if tail.is_empty() {
            format!("{}/{}", self.base, index)
        } else {
            format!("{}/{}/{}", self.base, index, tail)
        }
    }
}

fn transport(e: reqwest::Error) -> SearchError {
    SearchError::Backend(e.to_string())
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SearchError::Backend(format!("{}: {}", status, body)))
}

/// Renders documents as a `_bulk` NDJSON payload.
pub fn bulk_body(docs: &[Row]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        out.push_str(&json!({ "index": {} }).to_string());
        out.push('\n');
        out.push_str(&serde_json::to_string(doc).map_err(|e| SearchError::Internal(e.to_string()))?);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait::async_trait]
impl SearchBackend for HttpBackend {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<RawResponse> {
        let _timer = BACKEND_SEARCH_SECONDS
            .with_label_values(&[self.name()])
            .start_timer();
        let resp = self
            .client
            .post(self.url(index, "_search"))
            .json(&request.to_body())
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?.json().await.map_err(transport)
    }

    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        let resp = self
            .client
            .put(self.url(index, ""))
            .json(mapping)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await.map(|_| ())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(index, ""))
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await.map(|_| ())
    }

    async fn bulk_index(&self, index: &str, docs: Vec<Row>) -> Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }
        let resp = self
            .client
            .post(self.url(index, "_bulk"))
            .header("content-type", "application/x-ndjson")
            .body(bulk_body(&docs)?)
            .send()
            .await
            .map_err(transport)?;
        let report: Value = check(resp).await?.json().await.map_err(transport)?;
        if report.get("errors").and_then(Value::as_bool) == Some(true) {
            let first = report["items"]
                .as_array()
                .and_then(|items| items.iter().find_map(|i| i["index"].get("error").cloned()))
                .unwrap_or(Value::Null);
            return Err(SearchError::Backend(format!("bulk load rejected: {}", first)));
        }
        Ok(docs.len() as u64)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_drop_trailing_slash() {
        let b = HttpBackend::new("http://localhost:9200/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(b.base_url(), "http://localhost:9200");
        assert_eq!(b.url("people", "_search"), "http://localhost:9200/people/_search");
        assert_eq!(b.url("people", ""), "http://localhost:9200/people");
    }

    #[test]
    fn bulk_body_is_ndjson() {
        let docs: Vec<Row> =
            serde_json::from_value(json!([{"name": "Paul"}, {"name": "Marilyn"}])).unwrap();
        let body = bulk_body(&docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"index":{}}"#,
                r#"{"name":"Paul"}"#,
                r#"{"index":{}}"#,
                r#"{"name":"Marilyn"}"#
            ]
        );
        assert!(body.ends_with('\n'));
    }
}
