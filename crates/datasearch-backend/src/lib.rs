pub mod http;
pub mod mem;
pub mod metrics;
pub mod service;
pub mod supervisor;
pub mod traits;

pub use http::HttpBackend;
pub use mem::InMemoryBackend;
pub use service::{Explanation, SearchService};
pub use supervisor::{
    DocumentSource, IndexSupervisor, JsonLinesSource, ReindexJob, ReindexOutcome, ReindexState,
    StaticSource,
};
pub use traits::*;
