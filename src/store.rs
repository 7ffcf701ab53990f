// src/store.rs
//! Item Store: the one persisted relation every stage reads and writes.
//!
//! - Identity is the link (`UNIQUE`); link-less entries are stored with `NULL`
//!   and never collide.
//! - Timestamps are UTC unix seconds on disk and `DateTime<Utc>` in the API.
//! - Every mutating call commits on its own. The connection mutex is held only
//!   for the duration of one call, never across an `.await`.
//! - Writes that move state forward are guarded by a WHERE predicate, so
//!   replaying a batch after a crash cannot regress an item.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    fetch_address TEXT,
    link TEXT UNIQUE,
    title TEXT NOT NULL,
    published_at INTEGER NOT NULL,
    ingested_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    full_text TEXT,
    resolution_state TEXT NOT NULL DEFAULT 'pending'
        CHECK (resolution_state IN ('pending', 'resolved', 'unresolved')),
    resolution_attempted_at INTEGER,
    relevance_score REAL
        CHECK (relevance_score IS NULL OR (relevance_score >= 0 AND relevance_score <= 100)),
    relevance_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_items_source ON items(source_name);
CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at);
CREATE INDEX IF NOT EXISTS idx_items_score ON items(relevance_score);
CREATE INDEX IF NOT EXISTS idx_items_resolution ON items(resolution_state);
CREATE INDEX IF NOT EXISTS idx_items_last_seen ON items(last_seen_at);
";

const ITEM_COLUMNS: &str = "id, source_name, link, title, published_at, ingested_at, last_seen_at, \
     summary, full_text, resolution_state, resolution_attempted_at, relevance_score, relevance_reason";

/// Full-text capture state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Pending,
    Resolved,
    Unresolved,
}

impl ResolutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionState::Pending => "pending",
            ResolutionState::Resolved => "resolved",
            ResolutionState::Unresolved => "unresolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResolutionState::Pending),
            "resolved" => Some(ResolutionState::Resolved),
            "unresolved" => Some(ResolutionState::Unresolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: i64,
    pub source_name: String,
    pub link: Option<String>,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub summary: String,
    pub full_text: Option<String>,
    pub resolution_state: ResolutionState,
    pub resolution_attempted_at: Option<DateTime<Utc>>,
    pub relevance_score: Option<f64>,
    pub relevance_reason: Option<String>,
}

impl Item {
    /// Text to judge: full text for resolved items, the feed summary otherwise.
    /// The flag tells whether the full text was used.
    pub fn best_text(&self) -> (&str, bool) {
        match (self.resolution_state, self.full_text.as_deref()) {
            (ResolutionState::Resolved, Some(t)) => (t, true),
            _ => (self.summary.as_str(), false),
        }
    }
}

/// Insert payload produced by the fetcher.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_name: String,
    pub fetch_address: String,
    pub link: Option<String>,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    /// Link already known; only `last_seen_at` moved.
    Touched,
}

/// Row handed to the content resolver.
#[derive(Debug, Clone)]
pub struct ResolveCandidate {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub source_name: String,
    pub state: ResolutionState,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveQuery {
    pub limit: usize,
    /// Ignore the resolution state entirely.
    pub force: bool,
    pub source: Option<String>,
    pub max_age_days: Option<i64>,
    /// Unresolved items whose last attempt is older than this are eligible again.
    pub retry_cooldown: Option<chrono::Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct JudgeQuery {
    pub limit: usize,
    pub source: Option<String>,
    pub exclude_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    pub name: String,
    pub scored: usize,
    pub avg_score: f64,
    pub kept: usize,
    pub with_full_text: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringStats {
    pub threshold: f64,
    pub total: usize,
    pub scored: usize,
    pub avg_score: Option<f64>,
    pub kept: usize,
    pub rejected: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub per_source: Vec<SourceStats>,
}

impl ScoringStats {
    pub fn scoring_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.scored as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Clone)]
pub struct ItemStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for ItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStore").finish_non_exhaustive()
    }
}

impl ItemStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating store directory {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening item store {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory item store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("creating items schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("item store connection lock poisoned"))
    }

    /// Maximum stored `published_at` for a source; `None` before its first item.
    pub fn watermark(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(published_at) FROM items WHERE source_name = ?1",
                params![source],
                |r| r.get(0),
            )
            .context("reading watermark")?;
        Ok(max.map(from_ts))
    }

    /// Insert a new item, or just heartbeat `last_seen_at` if its link is known.
    /// Link-less items are always inserted.
    pub fn upsert(&self, item: &NewItem, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = tx
            .execute(
                "INSERT INTO items
                    (source_name, fetch_address, link, title, published_at,
                     ingested_at, last_seen_at, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
                 ON CONFLICT(link) DO NOTHING",
                params![
                    item.source_name,
                    item.fetch_address,
                    item.link,
                    item.title,
                    item.published_at.timestamp(),
                    now.timestamp(),
                    item.summary,
                ],
            )
            .context("inserting item")?;
        let outcome = if inserted == 1 {
            UpsertOutcome::Inserted(tx.last_insert_rowid())
        } else {
            tx.execute(
                "UPDATE items SET last_seen_at = ?1 WHERE link = ?2",
                params![now.timestamp(), item.link],
            )
            .context("touching item")?;
            UpsertOutcome::Touched
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Heartbeat only. Returns whether a stored item carries this link.
    pub fn touch(&self, link: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE items SET last_seen_at = ?1 WHERE link = ?2",
                params![now.timestamp(), link],
            )
            .context("touching item")?;
        Ok(n > 0)
    }

    pub fn get(&self, id: i64) -> Result<Option<Item>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
        let item = conn
            .query_row(&sql, params![id], map_item)
            .optional()
            .context("loading item")?;
        Ok(item)
    }

    pub fn get_by_link(&self, link: &str) -> Result<Option<Item>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE link = ?1");
        let item = conn
            .query_row(&sql, params![link], map_item)
            .optional()
            .context("loading item by link")?;
        Ok(item)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Items due for a full-text attempt: pending first, then newest first.
    pub fn resolution_candidates(
        &self,
        q: &ResolveQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolveCandidate>> {
        let mut clauses = vec!["link LIKE 'http%'".to_string()];
        let mut args: Vec<Value> = Vec::new();

        if !q.force {
            match q.retry_cooldown {
                Some(cooldown) => {
                    clauses.push(
                        "(resolution_state = 'pending' OR (resolution_state = 'unresolved' \
                         AND (resolution_attempted_at IS NULL OR resolution_attempted_at <= ?)))"
                            .to_string(),
                    );
                    args.push(Value::Integer((now - cooldown).timestamp()));
                }
                None => clauses.push("resolution_state = 'pending'".to_string()),
            }
        }
        if let Some(src) = &q.source {
            clauses.push("source_name = ?".to_string());
            args.push(Value::Text(src.clone()));
        }
        if let Some(days) = q.max_age_days {
            clauses.push("published_at >= ?".to_string());
            args.push(Value::Integer((now - chrono::Duration::days(days)).timestamp()));
        }
        args.push(Value::Integer(q.limit as i64));

        let sql = format!(
            "SELECT id, link, title, source_name, resolution_state FROM items
             WHERE {}
             ORDER BY CASE WHEN resolution_state = 'pending' THEN 0 ELSE 1 END,
                      published_at DESC, id ASC
             LIMIT ?",
            clauses.join(" AND ")
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |r| {
                let state: String = r.get(4)?;
                Ok(ResolveCandidate {
                    id: r.get(0)?,
                    link: r.get(1)?,
                    title: r.get(2)?,
                    source_name: r.get(3)?,
                    state: ResolutionState::parse(&state).unwrap_or(ResolutionState::Pending),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("querying resolution candidates")?;
        Ok(rows)
    }

    /// Store captured full text and move the item to `resolved`.
    pub fn mark_resolved(&self, id: i64, full_text: &str, now: DateTime<Utc>) -> Result<bool> {
        if full_text.trim().is_empty() {
            return Err(anyhow!("refusing to resolve item {id} with empty text"));
        }
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE items
                 SET full_text = ?1, resolution_state = 'resolved', resolution_attempted_at = ?2
                 WHERE id = ?3",
                params![full_text, now.timestamp(), id],
            )
            .context("marking item resolved")?;
        Ok(n > 0)
    }

    /// Record a failed attempt. A resolved item is never downgraded.
    pub fn mark_unresolved(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE items
                 SET resolution_state = 'unresolved', resolution_attempted_at = ?1
                 WHERE id = ?2 AND resolution_state != 'resolved'",
                params![now.timestamp(), id],
            )
            .context("marking item unresolved")?;
        Ok(n > 0)
    }

    /// Items without a score, newest first.
    pub fn judge_candidates(&self, q: &JudgeQuery) -> Result<Vec<Item>> {
        let mut clauses = vec!["relevance_score IS NULL".to_string()];
        let mut args: Vec<Value> = Vec::new();
        if let Some(src) = &q.source {
            clauses.push("source_name = ?".to_string());
            args.push(Value::Text(src.clone()));
        }
        if !q.exclude_sources.is_empty() {
            let marks = vec!["?"; q.exclude_sources.len()].join(", ");
            clauses.push(format!("source_name NOT IN ({marks})"));
            args.extend(q.exclude_sources.iter().cloned().map(Value::Text));
        }
        args.push(Value::Integer(q.limit as i64));

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE {} ORDER BY published_at DESC, id ASC LIMIT ?",
            clauses.join(" AND ")
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), map_item)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("querying judge candidates")?;
        Ok(rows)
    }

    /// Persist a score once. Returns `false` if the item already had one.
    pub fn record_judgment(&self, id: i64, score: f64, reason: &str) -> Result<bool> {
        let score = clamp_score(score);
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE items SET relevance_score = ?1, relevance_reason = ?2
                 WHERE id = ?3 AND relevance_score IS NULL",
                params![score, reason, id],
            )
            .context("recording judgment")?;
        Ok(n > 0)
    }

    /// Explicit reset: clears scores (optionally for one source). Returns rows cleared.
    pub fn reset_scores(&self, source: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let n = match source {
            Some(s) => conn.execute(
                "UPDATE items SET relevance_score = NULL, relevance_reason = NULL
                 WHERE source_name = ?1 AND relevance_score IS NOT NULL",
                params![s],
            ),
            None => conn.execute(
                "UPDATE items SET relevance_score = NULL, relevance_reason = NULL
                 WHERE relevance_score IS NOT NULL",
                [],
            ),
        }
        .context("resetting scores")?;
        Ok(n)
    }

    /// Selection pool: scored at or above `threshold` with a rationale,
    /// ordered by score then recency, capped at `prefetch`.
    pub fn scored_candidates(&self, threshold: f64, prefetch: usize) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE relevance_score >= ?1
               AND relevance_reason IS NOT NULL AND relevance_reason != ''
             ORDER BY relevance_score DESC, published_at DESC, id ASC
             LIMIT ?2"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![threshold, prefetch as i64], map_item)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("querying scored candidates")?;
        Ok(rows)
    }

    pub fn scoring_stats(&self, threshold: f64) -> Result<ScoringStats> {
        let conn = self.conn()?;
        let (total, scored, avg, kept, rejected, resolved, unresolved): (
            i64,
            i64,
            Option<f64>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
        ) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(relevance_score), AVG(relevance_score),
                        SUM(CASE WHEN relevance_score >= ?1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN relevance_score < ?1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN resolution_state = 'resolved' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN resolution_state = 'unresolved' THEN 1 ELSE 0 END)
                 FROM items",
                params![threshold],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                    ))
                },
            )
            .context("reading scoring totals")?;

        let mut stmt = conn.prepare(
            "SELECT source_name, COUNT(*), AVG(relevance_score),
                    SUM(CASE WHEN relevance_score >= ?1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN resolution_state = 'resolved' THEN 1 ELSE 0 END)
             FROM items
             WHERE relevance_score IS NOT NULL
             GROUP BY source_name
             ORDER BY AVG(relevance_score) DESC, source_name ASC",
        )?;
        let per_source = stmt
            .query_map(params![threshold], |r| {
                Ok(SourceStats {
                    name: r.get(0)?,
                    scored: r.get::<_, i64>(1)? as usize,
                    avg_score: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    kept: r.get::<_, Option<i64>>(3)?.unwrap_or(0) as usize,
                    with_full_text: r.get::<_, Option<i64>>(4)?.unwrap_or(0) as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("reading per-source stats")?;

        Ok(ScoringStats {
            threshold,
            total: total as usize,
            scored: scored as usize,
            avg_score: avg,
            kept: kept.unwrap_or(0) as usize,
            rejected: rejected.unwrap_or(0) as usize,
            resolved: resolved.unwrap_or(0) as usize,
            unresolved: unresolved.unwrap_or(0) as usize,
            per_source,
        })
    }

    /// Retention: delete items not re-observed since `cutoff`. Never called by
    /// the pipeline stages themselves.
    pub fn prune_unseen_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM items WHERE last_seen_at < ?1",
                params![cutoff.timestamp()],
            )
            .context("pruning unseen items")?;
        Ok(n)
    }
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn map_item(r: &Row<'_>) -> rusqlite::Result<Item> {
    let state: String = r.get(9)?;
    Ok(Item {
        id: r.get(0)?,
        source_name: r.get(1)?,
        link: r.get(2)?,
        title: r.get(3)?,
        published_at: from_ts(r.get(4)?),
        ingested_at: from_ts(r.get(5)?),
        last_seen_at: from_ts(r.get(6)?),
        summary: r.get(7)?,
        full_text: r.get(8)?,
        resolution_state: ResolutionState::parse(&state).unwrap_or(ResolutionState::Pending),
        resolution_attempted_at: r.get::<_, Option<i64>>(10)?.map(from_ts),
        relevance_score: r.get(11)?,
        relevance_reason: r.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn new_item(source: &str, link: Option<&str>, published: i64) -> NewItem {
        NewItem {
            source_name: source.into(),
            fetch_address: format!("https://{source}.example/feed"),
            link: link.map(Into::into),
            title: "Title".into(),
            published_at: t(published),
            summary: "summary".into(),
        }
    }

    #[test]
    fn upsert_inserts_then_touches() {
        let store = ItemStore::open_in_memory().unwrap();
        let it = new_item("a", Some("https://a.example/1"), 1_000);

        let first = store.upsert(&it, t(5_000)).unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let mut changed = it.clone();
        changed.summary = "rewritten".into();
        let second = store.upsert(&changed, t(6_000)).unwrap();
        assert_eq!(second, UpsertOutcome::Touched);

        let stored = store.get_by_link("https://a.example/1").unwrap().unwrap();
        assert_eq!(stored.summary, "summary", "summary is immutable after first write");
        assert_eq!(stored.last_seen_at, t(6_000));
        assert_eq!(stored.ingested_at, t(5_000));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn linkless_items_never_collide() {
        let store = ItemStore::open_in_memory().unwrap();
        let it = new_item("a", None, 1_000);
        store.upsert(&it, t(2_000)).unwrap();
        store.upsert(&it, t(2_000)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn watermark_is_per_source_max() {
        let store = ItemStore::open_in_memory().unwrap();
        assert_eq!(store.watermark("a").unwrap(), None);
        store.upsert(&new_item("a", Some("l1"), 100), t(1)).unwrap();
        store.upsert(&new_item("a", Some("l2"), 300), t(1)).unwrap();
        store.upsert(&new_item("b", Some("l3"), 900), t(1)).unwrap();
        assert_eq!(store.watermark("a").unwrap(), Some(t(300)));
        assert_eq!(store.watermark("b").unwrap(), Some(t(900)));
    }

    #[test]
    fn unresolved_never_downgrades_resolved() {
        let store = ItemStore::open_in_memory().unwrap();
        let id = match store
            .upsert(&new_item("a", Some("https://a.example/x"), 100), t(1))
            .unwrap()
        {
            UpsertOutcome::Inserted(id) => id,
            other => panic!("unexpected {other:?}"),
        };
        assert!(store.mark_resolved(id, "body text", t(2)).unwrap());
        assert!(!store.mark_unresolved(id, t(3)).unwrap());
        let item = store.get(id).unwrap().unwrap();
        assert_eq!(item.resolution_state, ResolutionState::Resolved);
        assert_eq!(item.best_text(), ("body text", true));
    }

    #[test]
    fn judgments_are_sticky_and_clamped() {
        let store = ItemStore::open_in_memory().unwrap();
        store.upsert(&new_item("a", Some("l1"), 100), t(1)).unwrap();
        let id = store.get_by_link("l1").unwrap().unwrap().id;

        assert!(store.record_judgment(id, 150.0, "great").unwrap());
        assert!(!store.record_judgment(id, 10.0, "again").unwrap());
        let item = store.get(id).unwrap().unwrap();
        assert_eq!(item.relevance_score, Some(100.0));
        assert_eq!(item.relevance_reason.as_deref(), Some("great"));

        assert_eq!(store.reset_scores(None).unwrap(), 1);
        assert!(store.record_judgment(id, -5.0, "low").unwrap());
        assert_eq!(store.get(id).unwrap().unwrap().relevance_score, Some(0.0));
    }

    #[test]
    fn resolution_candidates_respect_cooldown() {
        let store = ItemStore::open_in_memory().unwrap();
        store
            .upsert(&new_item("a", Some("https://a.example/1"), 100), t(1))
            .unwrap();
        store
            .upsert(&new_item("a", Some("https://a.example/2"), 200), t(1))
            .unwrap();
        store.upsert(&new_item("a", Some("ftp://nope"), 300), t(1)).unwrap();

        let failed = store.get_by_link("https://a.example/2").unwrap().unwrap().id;
        let now = t(1_000_000);
        store.mark_unresolved(failed, now - Duration::hours(1)).unwrap();

        let mut q = ResolveQuery {
            limit: 10,
            retry_cooldown: Some(Duration::hours(24)),
            ..Default::default()
        };
        let c = store.resolution_candidates(&q, now).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].link, "https://a.example/1");

        q.retry_cooldown = Some(Duration::minutes(30));
        let c = store.resolution_candidates(&q, now).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].state, ResolutionState::Pending, "pending first");

        q.force = true;
        assert_eq!(store.resolution_candidates(&q, now).unwrap().len(), 2);
    }

    #[test]
    fn prune_only_removes_stale_rows() {
        let store = ItemStore::open_in_memory().unwrap();
        store.upsert(&new_item("a", Some("old"), 1), t(100)).unwrap();
        store.upsert(&new_item("a", Some("new"), 2), t(900)).unwrap();
        assert_eq!(store.prune_unseen_before(t(500)).unwrap(), 1);
        assert!(store.get_by_link("new").unwrap().is_some());
    }
}
