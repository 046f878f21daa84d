use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datasearch_backend::http::DEFAULT_TIMEOUT;
use datasearch_backend::supervisor::DEFAULT_BATCH;
use datasearch_backend::{
    HttpBackend, InMemoryBackend, JsonLinesSource, SearchBackend, SearchService,
};
use datasearch_core::{split_params, Dictionary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "datasearch")]
#[command(about = "DataSearch query CLI", long_about = None)]
struct Cli {
    /// Data descriptor (JSON)
    #[arg(long, short = 'd', env = "DATA_DICTIONARY")]
    dictionary: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the index and backend body a search would send
    Explain {
        /// Terms and options as key=value
        #[arg(value_parser = parse_pair)]
        params: Vec<(String, String)>,
    },
    /// Run a search and print the result document
    Query {
        #[arg(long)]
        url: Option<String>,
        /// Load newline-delimited JSON into an in-memory index instead
        #[arg(long, conflicts_with = "url")]
        data: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
        timeout_secs: u64,
        #[arg(value_parser = parse_pair)]
        params: Vec<(String, String)>,
    },
    /// Print the index mapping generated from the descriptor
    Mapping,
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dictionary = Arc::new(
        Dictionary::load(&cli.dictionary)
            .with_context(|| format!("loading {}", cli.dictionary.display()))?,
    );
    match cli.cmd {
        Cmd::Mapping => print_json(&dictionary.mapping())?,
        Cmd::Explain { params } => {
            let (terms, options) = split_params(params)?;
            let service = SearchService::new(dictionary, Arc::new(InMemoryBackend::new()));
            print_json(&service.explain(&terms, &options)?)?;
        }
        Cmd::Query {
            url,
            data,
            timeout_secs,
            params,
        } => {
            let (terms, options) = split_params(params)?;
            let backend: Arc<dyn SearchBackend> = match &url {
                Some(url) => Arc::new(HttpBackend::new(
                    url.clone(),
                    Duration::from_secs(timeout_secs),
                )?),
                None => Arc::new(InMemoryBackend::new()),
            };
            let service = SearchService::new(dictionary, backend);
            match (&url, data) {
                (None, Some(path)) => {
                    let source = JsonLinesSource::open(&path, DEFAULT_BATCH).await?;
                    service.reindex(Box::new(source)).handle.await??;
                }
                (None, None) => anyhow::bail!("either --url or --data is required"),
                _ => {}
            }
            print_json(&service.search(&terms, &options).await?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("age__range=10..20"),
            Ok(("age__range".to_string(), "10..20".to_string()))
        );
        assert_eq!(
            parse_pair("q=a=b"),
            Ok(("q".to_string(), "a=b".to_string()))
        );
        assert!(parse_pair("name").is_err());
    }

    #[test]
    fn query_args() {
        let cli = Cli::try_parse_from([
            "datasearch",
            "-d",
            "people.json",
            "query",
            "--data",
            "people.ndjson",
            "name=Paul",
            "fields=name,age",
        ])
        .unwrap();
        match cli.cmd {
            Cmd::Query { data, params, url, .. } => {
                assert_eq!(data, Some(PathBuf::from("people.ndjson")));
                assert!(url.is_none());
                assert_eq!(params.len(), 2);
                let (terms, options) = split_params(params).unwrap();
                assert_eq!(terms.get("name"), Some("Paul"));
                assert_eq!(options.fields.map(|f| f.len()), Some(2));
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn url_and_data_conflict() {
        assert!(Cli::try_parse_from([
            "datasearch", "-d", "p.json", "query", "--url", "http://es:9200", "--data", "p.ndjson",
        ])
        .is_err());
    }
}
