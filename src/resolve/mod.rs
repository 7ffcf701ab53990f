// src/resolve/mod.rs
//! Content Resolver: fills `full_text` through an ordered chain of
//! extraction strategies.
//!
//! The first strategy whose text is longer than `min_chars` wins and ends the
//! chain. When every strategy fails the item becomes `unresolved` and keeps its
//! summary as the fallback text; a `resolved` item is never downgraded.

pub mod strategies;

pub use strategies::{default_chain, ExtractionStrategy};

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::time::Duration;

use crate::config::pipeline::ResolveCfg;
use crate::pacing::Pacer;
use crate::store::{ItemStore, ResolveQuery};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("resolve_resolved_total", "Items whose full text was captured.");
        describe_counter!(
            "resolve_unresolved_total",
            "Items for which every extraction strategy failed."
        );
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    pub attempted: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

/// Per-run filters on top of the configured batch limit and cooldown.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub limit: Option<usize>,
    pub force: bool,
    pub source: Option<String>,
    pub max_age_days: Option<i64>,
}

impl ResolveOptions {
    pub fn query(&self, cfg: &ResolveCfg) -> ResolveQuery {
        ResolveQuery {
            limit: self.limit.unwrap_or(cfg.batch_limit),
            force: self.force,
            source: self.source.clone(),
            max_age_days: self.max_age_days,
            retry_cooldown: cfg.retry_cooldown(),
        }
    }
}

/// Resolve one batch. Only a failing candidate query is an error; per-item
/// failures are logged and counted.
pub async fn run_batch(
    store: &ItemStore,
    strategies: &[Box<dyn ExtractionStrategy>],
    cfg: &ResolveCfg,
    opts: &ResolveOptions,
) -> Result<ResolveSummary> {
    ensure_metrics_described();

    let candidates = store.resolution_candidates(&opts.query(cfg), Utc::now())?;
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let mut pacer = Pacer::from_millis(cfg.delay_ms);
    let mut summary = ResolveSummary::default();

    tracing::info!(target: "resolve", candidates = candidates.len(), force = opts.force, "resolving full text");

    for cand in candidates {
        summary.attempted += 1;
        let found = run_chain(strategies, &cand.link, timeout, cfg, &mut pacer).await;
        let now = Utc::now();

        match found {
            Some((strategy, text)) => match store.mark_resolved(cand.id, &text, now) {
                Ok(_) => {
                    summary.resolved += 1;
                    counter!("resolve_resolved_total").increment(1);
                    tracing::info!(
                        target: "resolve",
                        id = cand.id,
                        source = %cand.source_name,
                        strategy,
                        chars = text.chars().count(),
                        "full text captured"
                    );
                }
                Err(e) => {
                    tracing::warn!(target: "resolve", id = cand.id, error = ?e, "storing full text failed")
                }
            },
            None => {
                if let Err(e) = store.mark_unresolved(cand.id, now) {
                    tracing::warn!(target: "resolve", id = cand.id, error = ?e, "recording failed attempt failed");
                    continue;
                }
                summary.unresolved += 1;
                counter!("resolve_unresolved_total").increment(1);
                tracing::info!(
                    target: "resolve",
                    id = cand.id,
                    link = %cand.link,
                    "no strategy produced enough text"
                );
            }
        }
    }

    Ok(summary)
}

/// Try each strategy in order; the first acceptable text wins. Items are
/// paced, not strategies: the built-in chain downloads each link once.
async fn run_chain<'a>(
    strategies: &'a [Box<dyn ExtractionStrategy>],
    link: &str,
    timeout: Duration,
    cfg: &ResolveCfg,
    pacer: &mut Pacer,
) -> Option<(&'a str, String)> {
    pacer.wait().await;
    for strategy in strategies {
        match strategy.extract(link, timeout).await {
            Ok(Some(text)) if accepts(&text, cfg.min_chars) => {
                return Some((strategy.name(), cap_chars(text.trim(), cfg.max_stored_chars)));
            }
            Ok(Some(text)) => {
                tracing::debug!(
                    target: "resolve",
                    strategy = strategy.name(),
                    chars = text.trim().chars().count(),
                    "text too short"
                );
            }
            Ok(None) => {
                tracing::debug!(target: "resolve", strategy = strategy.name(), "no result");
            }
            Err(e) => {
                tracing::debug!(target: "resolve", strategy = strategy.name(), error = %e, "strategy failed");
            }
        }
    }
    None
}

/// Strictly longer than `min_chars` characters after trimming.
pub fn accepts(text: &str, min_chars: usize) -> bool {
    text.trim().chars().count() > min_chars
}

fn cap_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
