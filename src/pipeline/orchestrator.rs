use crate::app::ports::Pacer;
use crate::constants::TOP_CITIES;
use crate::observability::metrics;
use crate::pipeline::upsert::Upserter;
use crate::types::{EventProvider, SeedQuery};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// Aggregate counts for one orchestrated run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub provider: String,
    pub seeds: usize,
    pub seeds_failed: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub upserted: usize,
    pub failed_chunks: usize,
    pub errors: Vec<String>,
}

/// City seeds from the fixed list, optionally narrowed to the given city names
pub fn city_seeds(only: Option<&[String]>) -> Vec<SeedQuery> {
    TOP_CITIES
        .iter()
        .filter(|(city, _)| {
            only.map_or(true, |names| {
                names.iter().any(|n| n.trim().eq_ignore_ascii_case(city))
            })
        })
        .map(|(city, state)| SeedQuery::City {
            city: city.to_string(),
            state_code: state.to_string(),
        })
        .collect()
}

/// Drives fetch, map, filter and upsert for each seed in turn
pub struct SeedOrchestrator {
    provider: Arc<dyn EventProvider>,
    upserter: Upserter,
    pacer: Arc<dyn Pacer>,
    table: String,
    seed_pause: Duration,
}

impl SeedOrchestrator {
    pub fn new(
        provider: Arc<dyn EventProvider>,
        upserter: Upserter,
        pacer: Arc<dyn Pacer>,
        table: &str,
    ) -> Self {
        Self {
            provider,
            upserter,
            pacer,
            table: table.to_string(),
            seed_pause: Duration::ZERO,
        }
    }

    pub fn with_seed_pause(mut self, pause: Duration) -> Self {
        self.seed_pause = pause;
        self
    }

    /// Run every seed sequentially. A failing seed is recorded and the loop moves on.
    pub async fn run(&self, seeds: &[SeedQuery]) -> RunSummary {
        let provider = self.provider.provider();
        let mut summary = RunSummary {
            provider: provider.to_string(),
            ..RunSummary::default()
        };

        for (index, seed) in seeds.iter().enumerate() {
            let span = info_span!("seed", provider = %provider, seed = %seed);
            self.run_seed(seed, &mut summary).instrument(span).await;
            if index + 1 < seeds.len() {
                self.pacer.pause(self.seed_pause).await;
            }
        }

        info!(
            "{} run finished: {} seed(s), {} fetched, {} skipped, {} upserted, {} failed seed(s)",
            provider,
            summary.seeds,
            summary.fetched,
            summary.skipped,
            summary.upserted,
            summary.seeds_failed
        );
        summary
    }

    async fn run_seed(&self, seed: &SeedQuery, summary: &mut RunSummary) {
        let provider = self.provider.provider().as_str();
        summary.seeds += 1;

        let outcome = self.provider.fetch_events(seed).await;
        if let Some(error) = &outcome.error {
            warn!("Seed {} ended early: {}", seed, error);
            metrics::seeds::failed(provider);
            summary.seeds_failed += 1;
            summary.errors.push(format!("{}: {}", seed, error));
        }
        summary.fetched += outcome.records.len();

        let mut rows: Vec<Value> = Vec::with_capacity(outcome.records.len());
        let mut skipped = 0;
        for raw in &outcome.records {
            let event = self.provider.map_event(raw);
            let (skip, reason) = self.provider.should_skip(&event);
            if skip {
                debug!("Skipping event: {}", reason);
                skipped += 1;
                continue;
            }
            rows.push(event.to_row());
        }
        if skipped > 0 {
            info!("Skipped {} event(s) without minimal data", skipped);
            metrics::provider::records_skipped(provider, skipped);
        }
        summary.skipped += skipped;

        let report = self
            .upserter
            .upsert(&self.table, rows, self.provider.conflict_column())
            .await;
        summary.upserted += report.upserted;
        summary.failed_chunks += report.failed_chunks;
        summary.errors.extend(report.errors);
        metrics::seeds::processed(provider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_seeds_filter_is_case_insensitive() {
        assert_eq!(city_seeds(None).len(), TOP_CITIES.len());
        let only = vec!["austin".to_string(), " Chicago ".to_string()];
        let seeds = city_seeds(Some(&only));
        assert_eq!(seeds.len(), 2);
        assert_eq!(
            seeds[0],
            SeedQuery::City {
                city: "Chicago".into(),
                state_code: "IL".into()
            }
        );
    }
}
