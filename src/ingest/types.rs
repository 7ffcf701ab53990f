// src/ingest/types.rs
use async_trait::async_trait;
use serde::Serialize;

use crate::error::FetchError;

/// One entry as parsed from a feed document, before any store interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: Option<String>,
    /// Normalized plain text (tags stripped, entities decoded), capped.
    pub summary: String,
    /// Raw time strings in preference order.
    pub time_candidates: Vec<String>,
}

/// Transport for feed documents. The HTTP implementation lives in `ingest::http`;
/// tests script responses through their own impls.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Fetched {
        considered: usize,
        inserted: usize,
        seen: usize,
    },
    Skipped,
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchSummary {
    pub inserted: usize,
    pub reports: Vec<SourceReport>,
}

impl FetchSummary {
    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Failed { .. }))
            .count()
    }

    pub fn fetched(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Fetched { .. }))
            .count()
    }

    pub fn report(&self, source: &str) -> Option<&SourceOutcome> {
        self.reports
            .iter()
            .find(|r| r.source == source)
            .map(|r| &r.outcome)
    }
}
