// tests/pipeline_cycle.rs
//! One full cycle (fetch, prefetch full text, judge) through `Pipeline`,
//! followed by selection and rendering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feed_curator::config::{PipelineConfig, SourcePolicy, SourceRegistry};
use feed_curator::error::FetchError;
use feed_curator::ingest::FeedClient;
use feed_curator::judge::MockOracle;
use feed_curator::publish::{render_rss, ChannelMeta};
use feed_curator::resolve::ExtractionStrategy;
use feed_curator::{ItemStore, Pipeline, ResolutionState};

struct StaticFeed(String);

#[async_trait]
impl FeedClient for StaticFeed {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.0.clone().into_bytes())
    }
}

/// Resolves only links containing "long".
struct PickyStrategy;

#[async_trait]
impl ExtractionStrategy for PickyStrategy {
    fn name(&self) -> &str {
        "picky"
    }

    async fn extract(&self, url: &str, _timeout: Duration) -> anyhow::Result<Option<String>> {
        if url.contains("long") {
            Ok(Some("Full article text. ".repeat(60)))
        } else {
            Ok(None)
        }
    }
}

fn recent_feed() -> String {
    let now = Utc::now();
    let item = |slug: &str, hours: i64, summary: &str| {
        format!(
            "<item><title>{slug}</title><link>https://blog.example/{slug}</link>\
             <description>{summary}</description><pubDate>{}</pubDate></item>",
            (now - chrono::Duration::hours(hours)).to_rfc2822()
        )
    };
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Blog</title>{}{}{}</channel></rss>"#,
        item("long-read", 2, "Short teaser."),
        item("announcement", 5, "A summary that is comfortably longer than fifty characters in total."),
        item("tiny", 9, "Too short."),
    )
}

#[tokio::test]
async fn cycle_fetches_resolves_and_judges() {
    let store = ItemStore::open_in_memory().unwrap();
    let registry = SourceRegistry::new(vec![SourcePolicy {
        name: "blog".into(),
        url: "https://blog.example/feed".into(),
        enabled: true,
        criteria: Some("long-form engineering articles".into()),
        priority: None,
    }])
    .unwrap();
    let oracle = Arc::new(MockOracle::fixed(72, "matches criteria"));
    let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![Box::new(PickyStrategy)];
    let pipeline = Pipeline::new(
        store.clone(),
        registry,
        PipelineConfig::default().without_delays(),
        Arc::new(StaticFeed(recent_feed())),
        strategies,
        oracle.clone(),
    );

    let report = pipeline.run_cycle().await;
    assert_eq!(report.fetch.inserted, 3);

    let resolve = report.resolve.expect("resolve stage ran");
    assert_eq!(resolve.attempted, 3);
    assert_eq!(resolve.resolved, 1);
    assert_eq!(resolve.unresolved, 2);

    let judge = report.judge.expect("judge stage ran");
    assert_eq!(judge.judged, 3);
    assert_eq!(judge.oracle_calls, 2);
    assert_eq!(judge.short_content, 1);
    assert_eq!(oracle.calls(), 2);

    let long = store.get_by_link("https://blog.example/long-read").unwrap().unwrap();
    assert_eq!(long.resolution_state, ResolutionState::Resolved);
    assert_eq!(long.relevance_score, Some(72.0));

    let tiny = store.get_by_link("https://blog.example/tiny").unwrap().unwrap();
    assert_eq!(tiny.resolution_state, ResolutionState::Unresolved);
    assert_eq!(tiny.relevance_score, Some(40.0));

    // Second cycle: nothing new, nothing rejudged.
    let again = pipeline.run_cycle().await;
    assert_eq!(again.fetch.inserted, 0);
    assert_eq!(again.judge.map(|j| j.judged), Some(0));
    assert_eq!(oracle.calls(), 2);

    let selected = pipeline.select().unwrap();
    let titles: Vec<&str> = selected.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["long-read", "announcement"]);

    let xml = render_rss(&ChannelMeta::from(&pipeline.config.serve), &selected, Utc::now()).unwrap();
    assert_eq!(xml.matches("<item>").count(), 2);
    assert!(xml.contains("Why it was picked: matches criteria"));
}
