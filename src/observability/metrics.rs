//! Pipeline metrics with Prometheus naming.
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op, so library code records unconditionally.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Every metric name used in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    ProviderRequestsSuccess,
    ProviderRequestsError,
    ProviderRequestDuration,
    ProviderRecordsFetched,
    RecordsSkipped,
    RowsUpserted,
    UpsertChunksFailed,
    UpsertDuration,
    SeedsProcessed,
    SeedsFailed,
    ApiRequests,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricName::ProviderRequestsSuccess => "ingest_provider_requests_success_total",
            MetricName::ProviderRequestsError => "ingest_provider_requests_error_total",
            MetricName::ProviderRequestDuration => "ingest_provider_request_duration_seconds",
            MetricName::ProviderRecordsFetched => "ingest_provider_records_fetched_total",
            MetricName::RecordsSkipped => "ingest_records_skipped_total",
            MetricName::RowsUpserted => "ingest_rows_upserted_total",
            MetricName::UpsertChunksFailed => "ingest_upsert_chunks_failed_total",
            MetricName::UpsertDuration => "ingest_upsert_duration_seconds",
            MetricName::SeedsProcessed => "ingest_seeds_processed_total",
            MetricName::SeedsFailed => "ingest_seeds_failed_total",
            MetricName::ApiRequests => "ingest_api_requests_total",
        };
        f.write_str(name)
    }
}

/// Install the Prometheus recorder once; later calls are no-ops
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_ok() {
                info!("Prometheus recorder installed");
            }
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Prometheus text exposition of everything recorded so far
pub fn render() -> String {
    HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

pub mod provider {
    use super::MetricName;

    pub fn request_success(provider: &'static str, duration_secs: f64) {
        metrics::counter!(MetricName::ProviderRequestsSuccess.to_string(), "provider" => provider)
            .increment(1);
        metrics::histogram!(MetricName::ProviderRequestDuration.to_string(), "provider" => provider)
            .record(duration_secs);
    }

    pub fn request_error(provider: &'static str, status: u16) {
        metrics::counter!(
            MetricName::ProviderRequestsError.to_string(),
            "provider" => provider,
            "status" => status.to_string()
        )
        .increment(1);
    }

    pub fn records_fetched(provider: &'static str, count: usize) {
        metrics::counter!(MetricName::ProviderRecordsFetched.to_string(), "provider" => provider)
            .increment(count as u64);
    }

    pub fn records_skipped(provider: &'static str, count: usize) {
        metrics::counter!(MetricName::RecordsSkipped.to_string(), "provider" => provider)
            .increment(count as u64);
    }
}

pub mod upsert {
    use super::MetricName;

    pub fn rows_upserted(table: &str, count: usize) {
        metrics::counter!(MetricName::RowsUpserted.to_string(), "table" => table.to_string())
            .increment(count as u64);
    }

    pub fn chunk_failed(table: &str) {
        metrics::counter!(MetricName::UpsertChunksFailed.to_string(), "table" => table.to_string())
            .increment(1);
    }

    pub fn duration(table: &str, duration_secs: f64) {
        metrics::histogram!(MetricName::UpsertDuration.to_string(), "table" => table.to_string())
            .record(duration_secs);
    }
}

pub mod seeds {
    use super::MetricName;

    pub fn processed(provider: &'static str) {
        metrics::counter!(MetricName::SeedsProcessed.to_string(), "provider" => provider)
            .increment(1);
    }

    pub fn failed(provider: &'static str) {
        metrics::counter!(MetricName::SeedsFailed.to_string(), "provider" => provider)
            .increment(1);
    }
}

pub mod api {
    use super::MetricName;

    pub fn request(endpoint: &'static str, source: &'static str) {
        metrics::counter!(
            MetricName::ApiRequests.to_string(),
            "endpoint" => endpoint,
            "source" => source
        )
        .increment(1);
    }
}
