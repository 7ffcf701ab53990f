// src/judge/mod.rs
//! Relevance Judge: scores unjudged items against their source's criteria.
//!
//! Local short-circuits come first (too little text, then no criteria), so the
//! oracle is only asked when it has something to work with. Oracle failures
//! become a fixed fallback score; nothing here fails the batch except the
//! candidate query itself.

pub mod oracle;

pub use oracle::{build_oracle, DynOracle, Judgment, JudgmentRequest, MockOracle, Oracle};

use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::pipeline::JudgeCfg;
use crate::config::SourceRegistry;
use crate::pacing::Pacer;
use crate::store::{clamp_score, Item, ItemStore, JudgeQuery};

pub const NO_CRITERIA_REASON: &str = "no criteria configured for source";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("judge_oracle_calls_total", "Calls made to the relevance oracle.");
        describe_counter!(
            "judge_fallback_total",
            "Judgments assigned without an oracle verdict, by kind."
        );
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JudgeSummary {
    pub judged: usize,
    pub oracle_calls: usize,
    pub short_content: usize,
    pub no_criteria: usize,
    pub errors: usize,
    pub kept: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default)]
pub struct JudgeOptions {
    pub limit: Option<usize>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    ShortContent,
    NoCriteria,
    Oracle,
    OracleError,
}

/// Judge one batch of unscored items, newest first.
pub async fn run_batch(
    store: &ItemStore,
    registry: &SourceRegistry,
    oracle: &dyn Oracle,
    cfg: &JudgeCfg,
    threshold: f64,
    opts: &JudgeOptions,
) -> Result<JudgeSummary> {
    ensure_metrics_described();

    let query = JudgeQuery {
        limit: opts.limit.unwrap_or(cfg.batch_limit),
        source: opts.source.clone(),
        exclude_sources: registry
            .all()
            .iter()
            .filter(|s| !s.enabled)
            .map(|s| s.name.clone())
            .collect(),
    };
    let items = store.judge_candidates(&query)?;
    tracing::info!(target: "judge", candidates = items.len(), oracle = oracle.name(), "judging");

    let mut pacer = Pacer::from_millis(cfg.delay_ms);
    let mut summary = JudgeSummary::default();

    for item in items {
        let (score, reason, verdict) = judge_item(&item, registry, oracle, cfg, &mut pacer).await;
        match verdict {
            Verdict::ShortContent => summary.short_content += 1,
            Verdict::NoCriteria => summary.no_criteria += 1,
            Verdict::Oracle => summary.oracle_calls += 1,
            Verdict::OracleError => {
                summary.oracle_calls += 1;
                summary.errors += 1;
            }
        }

        match store.record_judgment(item.id, score, &reason) {
            Ok(true) => {
                summary.judged += 1;
                if score >= threshold {
                    summary.kept += 1;
                } else {
                    summary.rejected += 1;
                }
                tracing::debug!(target: "judge", id = item.id, score, reason = %reason, "judged");
            }
            Ok(false) => {
                tracing::debug!(target: "judge", id = item.id, "already scored, left untouched");
            }
            Err(e) => {
                tracing::warn!(target: "judge", id = item.id, error = ?e, "storing judgment failed");
            }
        }
    }

    tracing::info!(
        target: "judge",
        judged = summary.judged,
        kept = summary.kept,
        rejected = summary.rejected,
        errors = summary.errors,
        "judge batch done"
    );
    Ok(summary)
}

async fn judge_item(
    item: &Item,
    registry: &SourceRegistry,
    oracle: &dyn Oracle,
    cfg: &JudgeCfg,
    pacer: &mut Pacer,
) -> (f64, String, Verdict) {
    let (text, full_text) = item.best_text();
    let text = text.trim();
    let chars = text.chars().count();

    if chars < cfg.min_chars {
        counter!("judge_fallback_total", "kind" => "short_content").increment(1);
        return (
            clamp_score(cfg.short_content_score),
            format!("content too short to judge ({chars} chars)"),
            Verdict::ShortContent,
        );
    }

    // Unknown sources count as having no criteria.
    let Some(criteria) = registry
        .get(&item.source_name)
        .and_then(|s| s.criteria())
    else {
        counter!("judge_fallback_total", "kind" => "no_criteria").increment(1);
        return (
            clamp_score(cfg.neutral_score),
            NO_CRITERIA_REASON.to_string(),
            Verdict::NoCriteria,
        );
    };

    let sample = sample_chars(text, cfg.sample_chars);
    let req = JudgmentRequest {
        criteria,
        title: &item.title,
        content: sample,
        full_text,
    };

    pacer.wait().await;
    counter!("judge_oracle_calls_total").increment(1);
    match oracle.judge(&req).await {
        Ok(j) => (clamp_score(j.score as f64), j.reason, Verdict::Oracle),
        Err(e) => {
            tracing::warn!(target: "judge", id = item.id, source = %item.source_name, error = %e, "oracle failed");
            counter!("judge_fallback_total", "kind" => e.kind()).increment(1);
            (
                clamp_score(cfg.error_score),
                format!("scoring error: {}", e.kind()),
                Verdict::OracleError,
            )
        }
    }
}

/// Explicit reset; never called implicitly by any stage.
pub fn reset_scores(store: &ItemStore, source: Option<&str>) -> Result<usize> {
    let n = store.reset_scores(source)?;
    tracing::info!(target: "judge", cleared = n, source = source.unwrap_or("*"), "scores reset");
    Ok(n)
}

fn sample_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
