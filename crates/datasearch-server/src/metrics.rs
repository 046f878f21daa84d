use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter_vec, Histogram, IntCounterVec};

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Requests by route and status",
        &["route", "status"]
    )
    .unwrap()
});

pub static EXPLAIN_MICROS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "explain_query_micros",
        "Explain query translation time (µs)",
        vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});
