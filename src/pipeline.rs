// src/pipeline.rs
//! Composition root. Owns the store, the registry and the stage collaborators;
//! every stage can also be run on its own.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::config::{OracleConfig, PipelineConfig, SourceRegistry};
use crate::ingest::{self, http::HttpFeedClient, FeedClient, FetchSummary};
use crate::judge::{self, build_oracle, DynOracle, JudgeOptions, JudgeSummary};
use crate::resolve::{self, ExtractionStrategy, ResolveOptions, ResolveSummary};
use crate::select::{self, SelectionPolicy};
use crate::store::{Item, ItemStore};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub fetch: FetchSummary,
    pub resolve: Option<ResolveSummary>,
    pub judge: Option<JudgeSummary>,
}

pub struct Pipeline {
    pub store: ItemStore,
    pub registry: SourceRegistry,
    pub config: PipelineConfig,
    feeds: Arc<dyn FeedClient>,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    oracle: DynOracle,
}

impl Pipeline {
    pub fn new(
        store: ItemStore,
        registry: SourceRegistry,
        config: PipelineConfig,
        feeds: Arc<dyn FeedClient>,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        oracle: DynOracle,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            feeds,
            strategies,
            oracle,
        }
    }

    /// Production wiring: HTTP feeds, the default extraction chain and the
    /// configured oracle.
    pub fn from_config(
        store: ItemStore,
        registry: SourceRegistry,
        config: PipelineConfig,
        oracle_cfg: &OracleConfig,
    ) -> Result<Self> {
        let feeds = Arc::new(HttpFeedClient::new(config.fetch.timeout())?);
        let strategies = resolve::default_chain()?;
        let oracle = build_oracle(oracle_cfg)?;
        Ok(Self::new(store, registry, config, feeds, strategies, oracle))
    }

    pub fn policy(&self) -> SelectionPolicy {
        SelectionPolicy::from(&self.config.select)
    }

    pub async fn fetch(&self) -> FetchSummary {
        ingest::run_once(&self.store, &self.registry, self.feeds.as_ref(), &self.config.fetch).await
    }

    pub async fn resolve(&self, opts: &ResolveOptions) -> Result<ResolveSummary> {
        resolve::run_batch(&self.store, &self.strategies, &self.config.resolve, opts).await
    }

    pub async fn judge(&self, opts: &JudgeOptions) -> Result<JudgeSummary> {
        judge::run_batch(
            &self.store,
            &self.registry,
            self.oracle.as_ref(),
            &self.config.judge,
            self.config.select.threshold,
            opts,
        )
        .await
    }

    pub fn select(&self) -> Result<Vec<Item>> {
        select::select(&self.store, &self.policy(), Utc::now())
    }

    /// Fetch everything, prefetch recent full text, then judge.
    ///
    /// A failing resolve or judge step is logged and reported as `None`; the
    /// cycle itself never fails.
    pub async fn run_cycle(&self) -> CycleReport {
        let fetch = self.fetch().await;
        tracing::info!(
            target: "ingest",
            inserted = fetch.inserted,
            fetched = fetch.fetched(),
            failed = fetch.failed(),
            "fetch stage done"
        );

        let prefetch = ResolveOptions {
            limit: Some(self.config.cycle.prefetch_fulltext_limit),
            force: false,
            source: None,
            max_age_days: Some(self.config.cycle.prefetch_fulltext_days),
        };
        let resolve = match self.resolve(&prefetch).await {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(target: "resolve", error = ?e, "full-text prefetch failed");
                None
            }
        };

        let judge = match self.judge(&JudgeOptions::default()).await {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(target: "judge", error = ?e, "judge stage failed");
                None
            }
        };

        CycleReport {
            fetch,
            resolve,
            judge,
        }
    }
}
