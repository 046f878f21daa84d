use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

pub static BACKEND_SEARCH_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "backend_search_seconds",
        "Backend search round trip",
        &["backend"]
    )
    .unwrap()
});

pub static SEARCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("searches_total", "Searches by outcome", &["outcome"]).unwrap()
});

pub static REINDEX_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("reindex_runs_total", "Reindex runs by result", &["result"])
        .unwrap()
});

pub static REINDEX_GENERATION: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("reindex_generation", "Latest started reindex generation").unwrap()
});
