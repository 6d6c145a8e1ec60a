// Observability: Prometheus metrics recorded across the pipeline

pub mod metrics;

pub use metrics::{init_metrics, render};
