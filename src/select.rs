// src/select.rs
//! Selector: threshold + timeliness over scored items. Read-only.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;

use crate::config::pipeline::SelectCfg;
use crate::store::{Item, ItemStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    /// Minimum score (inclusive).
    pub threshold: f64,
    /// Final result size.
    pub limit: usize,
    /// Pool size read before the timeliness rule is applied.
    pub prefetch: usize,
    pub recency_days: i64,
    /// Items at or above this score ignore the recency window.
    pub evergreen_score: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::from(&SelectCfg::default())
    }
}

impl From<&SelectCfg> for SelectionPolicy {
    fn from(c: &SelectCfg) -> Self {
        Self {
            threshold: c.threshold,
            limit: c.limit,
            prefetch: c.prefetch,
            recency_days: c.recency_days,
            evergreen_score: c.evergreen_score,
        }
    }
}

pub fn select(store: &ItemStore, policy: &SelectionPolicy, now: DateTime<Utc>) -> Result<Vec<Item>> {
    let pool = store.scored_candidates(policy.threshold, policy.prefetch)?;
    let pool_len = pool.len();
    let out = apply_timeliness(pool, policy, now);
    tracing::debug!(target: "select", pool = pool_len, selected = out.len(), "selection done");
    Ok(out)
}

/// Keep items inside the recency window or at evergreen level, then order
/// newest first (score, then id, break ties) and truncate.
pub fn apply_timeliness(
    candidates: Vec<Item>,
    policy: &SelectionPolicy,
    now: DateTime<Utc>,
) -> Vec<Item> {
    let window_start = now - Duration::days(policy.recency_days);
    let mut kept: Vec<Item> = candidates
        .into_iter()
        .filter(|it| {
            let score = it.relevance_score.unwrap_or(0.0);
            score >= policy.threshold
                && (it.published_at >= window_start || score >= policy.evergreen_score)
        })
        .collect();

    kept.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| {
                let (sa, sb) = (a.relevance_score.unwrap_or(0.0), b.relevance_score.unwrap_or(0.0));
                sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    kept.truncate(policy.limit);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResolutionState;
    use chrono::TimeZone;

    fn item(id: i64, score: f64, age_days: i64, now: DateTime<Utc>) -> Item {
        let published = now - Duration::days(age_days);
        Item {
            id,
            source_name: "s".into(),
            link: Some(format!("https://example.com/{id}")),
            title: format!("item {id}"),
            published_at: published,
            ingested_at: published,
            last_seen_at: published,
            summary: String::new(),
            full_text: None,
            resolution_state: ResolutionState::Pending,
            resolution_attempted_at: None,
            relevance_score: Some(score),
            relevance_reason: Some("r".into()),
        }
    }

    #[test]
    fn evergreen_bypasses_window_and_recency_orders() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let policy = SelectionPolicy {
            threshold: 50.0,
            limit: 10,
            prefetch: 500,
            recency_days: 90,
            evergreen_score: 80.0,
        };
        let a = item(1, 85.0, 40, now);
        let b = item(2, 45.0, 5, now);
        let c = item(3, 82.0, 200, now);
        let d = item(4, 60.0, 120, now);
        let out = apply_timeliness(vec![c, b, a, d], &policy, now);
        let ids: Vec<i64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn ties_on_time_break_by_score_then_id() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let policy = SelectionPolicy {
            limit: 2,
            ..SelectionPolicy::default()
        };
        let out = apply_timeliness(
            vec![item(9, 60.0, 1, now), item(7, 70.0, 1, now), item(8, 60.0, 1, now)],
            &policy,
            now,
        );
        let ids: Vec<i64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![7, 8]);
    }
}
