use crate::metrics::SEARCHES_TOTAL;
use crate::supervisor::{DocumentSource, IndexSupervisor, ReindexJob};
use crate::traits::SearchBackend;
use datasearch_core::checker::validate;
use datasearch_core::response::shape_response;
use datasearch_core::{
    build, resolve_index, Dictionary, FieldDictionary, FilterTerms, QueryOptions, Result,
    ResultDocument, SearchError, SearchRequest,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// What a search would send without sending it.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub index: String,
    pub body: Value,
}

/// Everything a search needs, passed explicitly to the request handlers.
#[derive(Clone)]
pub struct SearchService {
    dictionary: Arc<Dictionary>,
    backend: Arc<dyn SearchBackend>,
    supervisor: IndexSupervisor,
}

impl SearchService {
    pub fn new(dictionary: Arc<Dictionary>, backend: Arc<dyn SearchBackend>) -> Self {
        let supervisor = IndexSupervisor::new(backend.clone());
        Self {
            dictionary,
            backend,
            supervisor,
        }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    pub fn supervisor(&self) -> &IndexSupervisor {
        &self.supervisor
    }

    fn prepare(&self, terms: &FilterTerms, options: &QueryOptions) -> Result<(String, SearchRequest)> {
        let dictionary: &dyn FieldDictionary = self.dictionary.as_ref();
        let issues = validate(terms, options, dictionary);
        if !issues.is_empty() {
            return Err(SearchError::Validation(issues));
        }
        let index = self.supervisor.resolve(&resolve_index(options, dictionary)?);
        let request = build(terms, options, dictionary)?;
        Ok((index, request))
    }

    pub fn explain(&self, terms: &FilterTerms, options: &QueryOptions) -> Result<Explanation> {
        let (index, request) = self.prepare(terms, options)?;
        Ok(Explanation {
            index,
            body: request.to_body(),
        })
    }

    pub async fn search(&self, terms: &FilterTerms, options: &QueryOptions) -> Result<ResultDocument> {
        let out = self.run(terms, options).await;
        let outcome = match &out {
            Ok(_) => "ok",
            Err(SearchError::Validation(_)) => "invalid",
            Err(_) => "error",
        };
        SEARCHES_TOTAL.with_label_values(&[outcome]).inc();
        out
    }

    async fn run(&self, terms: &FilterTerms, options: &QueryOptions) -> Result<ResultDocument> {
        tracing::info!(?terms, "search terms");
        let (index, request) = self.prepare(terms, options)?;
        tracing::info!(%index, body = %request.to_body(), "search query");

        let t0 = Instant::now();
        let raw = self.backend.search(&index, &request).await?;
        let search_time = t0.elapsed().as_secs_f64();
        tracing::info!(
            %index,
            total = raw.hits.total,
            took_ms = raw.took,
            search_time,
            "search finished"
        );
        Ok(shape_response(raw, &request, options, search_time))
    }

    /// Rebuilds the default index from `source` in the background.
    pub fn reindex(&self, source: Box<dyn DocumentSource>) -> ReindexJob {
        let base = self.dictionary.default_index();
        self.supervisor.start(&base, self.dictionary.mapping(), source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::InMemoryBackend;
    use crate::supervisor::StaticSource;
    use datasearch_core::Row;
    use serde_json::json;

    fn service() -> (SearchService, InMemoryBackend) {
        let dict = Dictionary::from_json(
            r#"{"index": "people", "api": "people", "dictionary": {"age": {"type": "integer"}}}"#,
        )
        .unwrap();
        let mem = InMemoryBackend::new();
        (SearchService::new(Arc::new(dict), Arc::new(mem.clone())), mem)
    }

    fn docs() -> Vec<Row> {
        serde_json::from_value(json!([
            {"name": "Paul", "age": 10},
            {"name": "Marilyn", "age": 14}
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn search_runs_against_reindexed_generation() {
        let (svc, _) = service();
        svc.reindex(Box::new(StaticSource::new(docs(), 10)))
            .handle
            .await
            .unwrap()
            .unwrap();
        let terms = FilterTerms::from_pairs([("age", "14")]);
        let doc = svc.search(&terms, &QueryOptions::default()).await.unwrap();
        assert_eq!(doc.metadata.total, 1);
        assert_eq!(doc.results[0]["name"], "Marilyn");

        let explained = svc.explain(&terms, &QueryOptions::default()).unwrap();
        assert_eq!(explained.index, "people-g1");
        assert_eq!(
            explained.body["query"]["bool"]["filter"][0],
            json!({"term": {"age": 14}})
        );
    }

    #[tokio::test]
    async fn validation_stops_before_the_backend() {
        let (svc, _) = service();
        let terms = FilterTerms::from_pairs([("age", "old")]);
        let err = svc.search(&terms, &QueryOptions::default()).await.unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_endpoint_lists_available() {
        let (svc, _) = service();
        let opts = QueryOptions {
            endpoint: Some("planets".into()),
            ..Default::default()
        };
        match svc.search(&FilterTerms::default(), &opts).await.unwrap_err() {
            SearchError::UnknownEndpoint { endpoint, available } => {
                assert_eq!(endpoint, "planets");
                assert_eq!(available, vec!["people".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_index_surfaces_backend_error() {
        let (svc, _) = service();
        let err = svc
            .search(&FilterTerms::default(), &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Backend(_)));
    }
}
