// src/ingest/mod.rs
pub mod http;
pub mod parser;
pub mod types;

pub use types::{FeedClient, FeedEntry, FetchSummary, SourceOutcome, SourceReport};

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::time::Duration;

use crate::config::pipeline::FetchCfg;
use crate::config::{SourcePolicy, SourceRegistry};
use crate::error::FetchError;
use crate::pacing::Pacer;
use crate::store::{ItemStore, NewItem, UpsertOutcome};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_items_inserted_total",
            "Items inserted on first observation of their link."
        );
        describe_counter!(
            "ingest_items_seen_total",
            "Known items re-observed (last_seen_at heartbeat)."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Sources that failed to fetch or parse in a cycle."
        );
        describe_gauge!("ingest_last_run_ts", "Unix ts when the fetcher last ran.");
    });
}

/// Normalize feed text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let out = html_escape::decode_html_entities(s);

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS
        .get_or_init(|| regex::Regex::new(r"(?is)</?[a-z!][^>]*>").expect("tag regex"));
    let out = re_tags.replace_all(&out, " ");

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("whitespace regex"));
    let out = re_ws.replace_all(&out, " ");
    let out = out.trim();

    // 4) Length cap (characters, not bytes)
    match out.char_indices().nth(max_chars) {
        Some((idx, _)) => out[..idx].trim_end().to_string(),
        None => out.to_string(),
    }
}

/// Poll every enabled source once and persist what is new.
///
/// Never fails as a whole: a source that cannot be fetched, parsed or stored is
/// reported as `Failed` and the remaining sources are still attempted.
pub async fn run_once(
    store: &ItemStore,
    registry: &SourceRegistry,
    client: &dyn FeedClient,
    cfg: &FetchCfg,
) -> FetchSummary {
    ensure_metrics_described();

    let mut summary = FetchSummary::default();
    let mut pacer = Pacer::from_millis(cfg.source_delay_ms);

    for source in registry.all() {
        if !source.enabled {
            tracing::debug!(target: "ingest", source = %source.name, "source disabled, skipping");
            summary.reports.push(SourceReport {
                source: source.name.clone(),
                outcome: SourceOutcome::Skipped,
            });
            continue;
        }

        pacer.wait().await;
        let outcome = match fetch_source(store, source, client, cfg).await {
            Ok(counts) => {
                tracing::info!(
                    target: "ingest",
                    source = %source.name,
                    considered = counts.considered,
                    inserted = counts.inserted,
                    seen = counts.seen,
                    "source fetched"
                );
                summary.inserted += counts.inserted;
                counter!("ingest_items_inserted_total").increment(counts.inserted as u64);
                counter!("ingest_items_seen_total").increment(counts.seen as u64);
                SourceOutcome::Fetched {
                    considered: counts.considered,
                    inserted: counts.inserted,
                    seen: counts.seen,
                }
            }
            Err(e) => {
                tracing::warn!(target: "ingest", source = %source.name, error = %e, "source failed");
                counter!("ingest_source_errors_total").increment(1);
                SourceOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
        };
        summary.reports.push(SourceReport {
            source: source.name.clone(),
            outcome,
        });
    }

    gauge!("ingest_last_run_ts").set(Utc::now().timestamp() as f64);
    summary
}

#[derive(Debug, Default, Clone, Copy)]
struct SourceCounts {
    considered: usize,
    inserted: usize,
    seen: usize,
}

async fn fetch_source(
    store: &ItemStore,
    source: &SourcePolicy,
    client: &dyn FeedClient,
    cfg: &FetchCfg,
) -> Result<SourceCounts> {
    let watermark = store.watermark(&source.name)?;
    let bytes = fetch_with_retry(client, &source.url, cfg).await?;
    let entries = parser::parse_feed(&bytes, cfg.summary_max_chars)?;
    let now = Utc::now();
    ingest_entries(store, source, entries, watermark, cfg.max_entries, now)
}

/// Only timeouts are retried; any other failure ends this source's cycle.
async fn fetch_with_retry(
    client: &dyn FeedClient,
    url: &str,
    cfg: &FetchCfg,
) -> Result<Vec<u8>, FetchError> {
    let attempts = cfg.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.fetch(url).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(target: "ingest", url, attempt, error = %e, "transient fetch failure, retrying");
                if cfg.retry_backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(cfg.retry_backoff_ms)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply the watermark rule to the first `max_entries` entries and write them.
fn ingest_entries(
    store: &ItemStore,
    source: &SourcePolicy,
    entries: Vec<FeedEntry>,
    watermark: Option<DateTime<Utc>>,
    max_entries: usize,
    now: DateTime<Utc>,
) -> Result<SourceCounts> {
    let mut counts = SourceCounts::default();

    for entry in entries.into_iter().take(max_entries) {
        counts.considered += 1;
        let published_at = parser::entry_time(&entry, now);

        // Link-less entries have no identity and are always new.
        let is_new = match (&entry.link, watermark) {
            (None, _) | (Some(_), None) => true,
            (Some(_), Some(w)) => published_at > w,
        };

        if !is_new {
            if let Some(link) = &entry.link {
                if store.touch(link, now)? {
                    counts.seen += 1;
                }
            }
            continue;
        }

        let item = NewItem {
            source_name: source.name.clone(),
            fetch_address: source.url.clone(),
            link: entry.link,
            title: entry.title,
            published_at,
            summary: entry.summary,
        };
        match store.upsert(&item, now)? {
            UpsertOutcome::Inserted(_) => counts.inserted += 1,
            UpsertOutcome::Touched => counts.seen += 1,
        }
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_and_collapses() {
        let s = "  <p>Hello,&nbsp;&nbsp;<b>world</b>!</p>\n\n ";
        assert_eq!(normalize_text(s, 100), "Hello, world !");
    }

    #[test]
    fn normalize_text_caps_by_chars() {
        let s = "ééééé";
        assert_eq!(normalize_text(s, 3), "ééé");
        assert_eq!(normalize_text(s, 10), "ééééé");
    }

    #[test]
    fn comparison_operators_are_not_tags() {
        assert_eq!(normalize_text("a < b and c > d", 100), "a < b and c > d");
    }
}
