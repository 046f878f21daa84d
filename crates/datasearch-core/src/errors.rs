use serde::Serialize;
use thiserror::Error;

/// A single problem found in caller-supplied terms or options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub input: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.input, self.message)
    }
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid request: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error("no configuration found for '{endpoint}', available endpoints: {available:?}")]
    UnknownEndpoint {
        endpoint: String,
        available: Vec<String>,
    },
    #[error("unsupported query: {0}")]
    Unsupported(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("dictionary error: {0}")]
    Dictionary(String),
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SearchError>;
