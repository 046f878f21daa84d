use datasearch_core::{RawResponse, Result, Row, SearchRequest};
use serde_json::Value;

/// Transport to a document-search backend. One call per search; no retries.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<RawResponse>;

    // Index management, used by reindexing
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()>;
    async fn delete_index(&self, index: &str) -> Result<()>;
    async fn bulk_index(&self, index: &str, docs: Vec<Row>) -> Result<u64>;

    fn name(&self) -> &'static str;
}
