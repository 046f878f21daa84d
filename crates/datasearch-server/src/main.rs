use datasearch_backend::supervisor::DEFAULT_BATCH;
use datasearch_backend::{HttpBackend, InMemoryBackend, JsonLinesSource, SearchBackend, SearchService};
use datasearch_core::Dictionary;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod metrics;
mod routes;

use config::Config;
use routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let dictionary = Arc::new(Dictionary::load(&config.dictionary_path)?);
    info!(
        path = %config.dictionary_path.display(),
        index = %dictionary.config().index,
        "data dictionary loaded"
    );

    let backend: Arc<dyn SearchBackend> = match &config.es_uri {
        Some(uri) => {
            info!(%uri, timeout_secs = config.timeout.as_secs(), "using search cluster");
            Arc::new(HttpBackend::new(uri.clone(), config.timeout)?)
        }
        None => {
            tracing::warn!("ES_URI unset, serving from the in-memory backend");
            Arc::new(InMemoryBackend::new())
        }
    };
    let service = SearchService::new(dictionary, backend);

    if config.load_on_start() {
        if let Some(path) = &config.data_path {
            match JsonLinesSource::open(path, DEFAULT_BATCH).await {
                Ok(source) => {
                    let job = service.reindex(Box::new(source));
                    info!(generation = job.generation, index = %job.index, "initial load started");
                }
                Err(e) => tracing::warn!("initial load skipped: {}", e),
            }
        }
    }

    let app = router(AppState {
        service,
        data_path: config.data_path.clone(),
        admin_token: config.admin_token.clone(),
    });

    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN unset, admin routes are disabled");
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("http listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
