use anyhow::Context;
use datasearch_backend::http::{DEFAULT_TIMEOUT, INDEXING_TIMEOUT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Process settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Search cluster base url; unset runs the in-memory backend.
    pub es_uri: Option<String>,
    pub dictionary_path: PathBuf,
    /// Newline-delimited JSON documents loaded on reindex.
    pub data_path: Option<PathBuf>,
    /// `INDEX_APP=enable`: this process also loads data.
    pub indexing: bool,
    pub bind_addr: SocketAddr,
    pub timeout: Duration,
    /// Bearer token for `/admin/*`; unset disables those routes.
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let indexing = var("INDEX_APP").as_deref() == Some("enable");
        let timeout = match var("ES_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(
                secs.trim()
                    .parse()
                    .with_context(|| format!("ES_TIMEOUT_SECS '{}' is not a number", secs))?,
            ),
            None if indexing => INDEXING_TIMEOUT,
            None => DEFAULT_TIMEOUT,
        };
        let bind = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND.to_string());
        Ok(Self {
            es_uri: var("ES_URI"),
            dictionary_path: var("DATA_DICTIONARY")
                .map(PathBuf::from)
                .context("DATA_DICTIONARY must name a data descriptor file")?,
            data_path: var("DATA_PATH").map(PathBuf::from),
            indexing,
            bind_addr: bind
                .parse()
                .with_context(|| format!("BIND_ADDR '{}' is not a socket address", bind))?,
            timeout,
            admin_token: var("ADMIN_TOKEN"),
        })
    }

    /// Whether to start a reindex as soon as the server is up.
    pub fn load_on_start(&self) -> bool {
        self.data_path.is_some() && (self.es_uri.is_none() || self.indexing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[("DATA_DICTIONARY", "people.json")]).unwrap();
        assert_eq!(c.bind_addr.to_string(), DEFAULT_BIND);
        assert_eq!(c.timeout, DEFAULT_TIMEOUT);
        assert!(c.es_uri.is_none());
        assert!(c.admin_token.is_none());
        assert!(!c.load_on_start());

        let c = config(&[("DATA_DICTIONARY", "people.json"), ("ADMIN_TOKEN", "s3cret")]).unwrap();
        assert_eq!(c.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn indexing_extends_timeout() {
        let c = config(&[
            ("DATA_DICTIONARY", "people.json"),
            ("INDEX_APP", "enable"),
            ("ES_URI", "http://localhost:9200"),
            ("DATA_PATH", "people.ndjson"),
        ])
        .unwrap();
        assert_eq!(c.timeout, INDEXING_TIMEOUT);
        assert!(c.load_on_start());

        let c = config(&[("DATA_DICTIONARY", "d.json"), ("ES_TIMEOUT_SECS", "3")]).unwrap();
        assert_eq!(c.timeout, Duration::from_secs(3));
    }

    #[test]
    fn missing_dictionary_and_bad_values_fail() {
        assert!(config(&[]).is_err());
        assert!(config(&[("DATA_DICTIONARY", "d.json"), ("BIND_ADDR", "nowhere")]).is_err());
        assert!(config(&[("DATA_DICTIONARY", "d.json"), ("ES_TIMEOUT_SECS", "soon")]).is_err());
    }
}
