//! Background reindexing. Each run builds a fresh generation of an index and
//! only becomes visible to searches once it has fully loaded.

use crate::metrics::{REINDEX_GENERATION, REINDEX_RUNS_TOTAL};
use crate::traits::SearchBackend;
use datasearch_core::{Result, Row, SearchError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexState {
    Idle,
    Running(u64),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexOutcome {
    Completed { index: String, documents: u64 },
    Cancelled,
}

/// Produces documents for a reindex run. `None` marks the end of input.
#[async_trait::async_trait]
pub trait DocumentSource: Send + 'static {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>>;
}

/// Newline-delimited JSON documents read from a file. Blank lines are
/// skipped; any other line that is not a JSON object fails the run.
pub struct JsonLinesSource {
    lines: Lines<BufReader<tokio::fs::File>>,
    batch: usize,
    line_no: usize,
}

impl JsonLinesSource {
    pub async fn open(path: impl AsRef<Path>, batch: usize) -> Result<Self> {
        let path = path.as_ref();
        let fh = tokio::fs::File::open(path)
            .await
            .map_err(|e| SearchError::Internal(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            lines: BufReader::new(fh).lines(),
            batch: batch.max(1),
            line_no: 0,
        })
    }
}

#[async_trait::async_trait]
impl DocumentSource for JsonLinesSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        let mut out = Vec::with_capacity(self.batch);
        while out.len() < self.batch {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| SearchError::Internal(e.to_string()))?;
            let Some(line) = line else { break };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(doc)) => out.push(doc),
                Ok(_) => {
                    return Err(SearchError::Internal(format!(
                        "line {}: expected a JSON object",
                        self.line_no
                    )))
                }
                Err(e) => {
                    return Err(SearchError::Internal(format!("line {}: {}", self.line_no, e)))
                }
            }
        }
        Ok((!out.is_empty()).then_some(out))
    }
}

/// Documents already held in memory, handed out in fixed-size batches.
pub struct StaticSource {
    docs: std::vec::IntoIter<Row>,
    batch: usize,
}

impl StaticSource {
    pub fn new(docs: Vec<Row>, batch: usize) -> Self {
        Self {
            docs: docs.into_iter(),
            batch: batch.max(1),
        }
    }
}

#[async_trait::async_trait]
impl DocumentSource for StaticSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        let chunk: Vec<Row> = self.docs.by_ref().take(self.batch).collect();
        Ok((!chunk.is_empty()).then_some(chunk))
    }
}

struct Inner {
    generation: u64,
    state: ReindexState,
    token: Option<CancellationToken>,
    // base name -> concrete index of the latest completed generation
    active: HashMap<String, String>,
}

pub struct ReindexJob {
    pub generation: u64,
    pub index: String,
    pub handle: JoinHandle<Result<ReindexOutcome>>,
}

/// Runs at most one reindex at a time; starting a new one cancels the
/// previous run.
#[derive(Clone)]
pub struct IndexSupervisor {
    backend: Arc<dyn SearchBackend>,
    inner: Arc<RwLock<Inner>>,
}

impl IndexSupervisor {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            inner: Arc::new(RwLock::new(Inner {
                generation: 0,
                state: ReindexState::Idle,
                token: None,
                active: HashMap::new(),
            })),
        }
    }

    pub fn state(&self) -> ReindexState {
        self.inner.read().state
    }

    /// Concrete index searches for `base` should hit.
    pub fn resolve(&self, base: &str) -> String {
        self.inner
            .read()
            .active
            .get(base)
            .cloned()
            .unwrap_or_else(|| base.to_string())
    }

    pub fn cancel(&self) {
        let mut inner = self.inner.write();
        if let Some(token) = inner.token.take() {
            token.cancel();
            inner.state = ReindexState::Cancelled;
        }
    }

    pub fn start(
        &self,
        base: &str,
        mapping: Value,
        source: Box<dyn DocumentSource>,
    ) -> ReindexJob {
        let token = CancellationToken::new();
        let generation = {
            let mut inner = self.inner.write();
            if let Some(prev) = inner.token.replace(token.clone()) {
                prev.cancel();
            }
            inner.generation += 1;
            inner.state = ReindexState::Running(inner.generation);
            inner.generation
        };
        REINDEX_GENERATION.set(generation as i64);
        let index = format!("{}-g{}", base, generation);
        tracing::info!(base, %index, generation, "reindex started");

        let run = Run {
            backend: self.backend.clone(),
            inner: self.inner.clone(),
            base: base.to_string(),
            index: index.clone(),
            generation,
            token,
        };
        let handle = tokio::spawn(run.execute(mapping, source));
        ReindexJob {
            generation,
            index,
            handle,
        }
    }
}

struct Run {
    backend: Arc<dyn SearchBackend>,
    inner: Arc<RwLock<Inner>>,
    base: String,
    index: String,
    generation: u64,
    token: CancellationToken,
}

impl Run {
    async fn execute(
        self,
        mapping: Value,
        source: Box<dyn DocumentSource>,
    ) -> Result<ReindexOutcome> {
        let loaded = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            r = self.load(mapping, source) => Some(r),
        };
        match loaded {
            Some(Ok(documents)) => match self.commit() {
                Some(previous) => {
                    if let Some(prev) = previous {
                        if let Err(e) = self.backend.delete_index(&prev).await {
                            tracing::warn!(index = %prev, error = %e, "failed to drop replaced index");
                        }
                    }
                    REINDEX_RUNS_TOTAL.with_label_values(&["completed"]).inc();
                    tracing::info!(index = %self.index, documents, "reindex completed");
                    Ok(ReindexOutcome::Completed {
                        index: self.index.clone(),
                        documents,
                    })
                }
                None => self.abandon().await,
            },
            Some(Err(e)) => {
                REINDEX_RUNS_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(index = %self.index, error = %e, "reindex failed");
                self.finish(ReindexState::Idle);
                let _ = self.backend.delete_index(&self.index).await;
                Err(e)
            }
            None => self.abandon().await,
        }
    }

    async fn load(&self, mapping: Value, mut source: Box<dyn DocumentSource>) -> Result<u64> {
        self.backend.create_index(&self.index, &mapping).await?;
        let mut documents = 0;
        while let Some(batch) = source.next_batch().await? {
            documents += self.backend.bulk_index(&self.index, batch).await?;
        }
        if documents == 0 {
            return Err(SearchError::Internal("source produced no documents".into()));
        }
        Ok(documents)
    }

    // Swaps the base name onto this generation unless it was cancelled in
    // the meantime. Returns the replaced concrete index.
    fn commit(&self) -> Option<Option<String>> {
        let mut inner = self.inner.write();
        if self.token.is_cancelled() {
            return None;
        }
        if inner.generation == self.generation {
            inner.state = ReindexState::Idle;
            inner.token = None;
        }
        Some(
            inner
                .active
                .insert(self.base.clone(), self.index.clone())
                .filter(|prev| *prev != self.index),
        )
    }

    async fn abandon(&self) -> Result<ReindexOutcome> {
        REINDEX_RUNS_TOTAL.with_label_values(&["cancelled"]).inc();
        tracing::info!(index = %self.index, "reindex cancelled");
        self.backend.delete_index(&self.index).await?;
        Ok(ReindexOutcome::Cancelled)
    }

    fn finish(&self, state: ReindexState) {
        let mut inner = self.inner.write();
        if inner.generation == self.generation {
            inner.state = state;
            inner.token = None;
        }
    }
}
