pub mod aggregate;
pub mod checker;
pub mod dictionary;
pub mod errors;
pub mod model;
pub mod params;
pub mod paths;
pub mod query;
pub mod reshape;
pub mod response;

pub use dictionary::{Dictionary, DictionaryConfig, FieldDictionary, FieldType, ResolvedField};
pub use errors::*;
pub use model::*;
pub use params::split_params;
pub use query::{build, resolve_index, SearchRequest};
pub use reshape::{reshape, KeyFormat, ReshapeMode};
pub use response::{RawResponse, ResultDocument, Row};
