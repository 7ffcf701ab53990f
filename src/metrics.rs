// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::store::{ItemStore, ScoringStats};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and expose a static gauge for the feed cache TTL.
    pub fn init(cache_ttl_secs: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe_gauge!("feed_cache_ttl_secs", "Absolute TTL of the rendered feed.");
        describe_gauge!("store_items_total", "Items in the store.");
        describe_gauge!("store_items_scored", "Items with a relevance score.");
        describe_gauge!("store_items_kept", "Scored items at or above the threshold.");
        describe_gauge!("store_items_resolved", "Items with captured full text.");
        gauge!("feed_cache_ttl_secs").set(cache_ttl_secs as f64);
        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus exposition format. Store gauges are
    /// refreshed on every scrape.
    pub fn router(&self, store: ItemStore, threshold: f64) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                let store = store.clone();
                async move {
                    let stats =
                        tokio::task::spawn_blocking(move || store.scoring_stats(threshold)).await;
                    match stats {
                        Ok(Ok(stats)) => record_store_stats(&stats),
                        Ok(Err(e)) => {
                            tracing::warn!(target: "api", error = ?e, "stats for /metrics failed")
                        }
                        Err(e) => {
                            tracing::warn!(target: "api", error = ?e, "stats task for /metrics failed")
                        }
                    }
                    h.render()
                }
            }),
        )
    }
}

pub fn record_store_stats(stats: &ScoringStats) {
    gauge!("store_items_total").set(stats.total as f64);
    gauge!("store_items_scored").set(stats.scored as f64);
    gauge!("store_items_kept").set(stats.kept as f64);
    gauge!("store_items_resolved").set(stats.resolved as f64);
}
