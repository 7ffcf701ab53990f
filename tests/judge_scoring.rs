// tests/judge_scoring.rs
//! Relevance judging with the mock oracle: clamping, local short-circuits,
//! fallback scores and score stickiness.

use chrono::Utc;
use feed_curator::config::{PipelineConfig, SourcePolicy, SourceRegistry};
use feed_curator::judge::{self, JudgeOptions, MockOracle, Oracle, NO_CRITERIA_REASON};
use feed_curator::store::{ItemStore, NewItem, UpsertOutcome};

const THRESHOLD: f64 = 50.0;
const LONG_SUMMARY: &str = "A detailed write-up of how a team replaced a garbage-collected \
    service with a Rust rewrite and what happened to their tail latencies.";

fn registry() -> SourceRegistry {
    SourceRegistry::new(vec![
        SourcePolicy {
            name: "rust-blog".into(),
            url: "https://rust.example/feed".into(),
            enabled: true,
            criteria: Some("Rust performance work, production case studies".into()),
            priority: Some("high".into()),
        },
        SourcePolicy {
            name: "misc".into(),
            url: "https://misc.example/feed".into(),
            enabled: true,
            criteria: Some("   ".into()),
            priority: None,
        },
        SourcePolicy {
            name: "off".into(),
            url: "https://off.example/feed".into(),
            enabled: false,
            criteria: Some("anything".into()),
            priority: None,
        },
    ])
    .unwrap()
}

fn add(store: &ItemStore, source: &str, slug: &str, summary: &str) -> i64 {
    let item = NewItem {
        source_name: source.into(),
        fetch_address: format!("https://{source}.example/feed"),
        link: Some(format!("https://{source}.example/{slug}")),
        title: format!("Post {slug}"),
        published_at: Utc::now(),
        summary: summary.into(),
    };
    match store.upsert(&item, Utc::now()).unwrap() {
        UpsertOutcome::Inserted(id) => id,
        UpsertOutcome::Touched => panic!("duplicate link {slug}"),
    }
}

async fn judge_all(store: &ItemStore, oracle: &dyn Oracle) -> judge::JudgeSummary {
    let cfg = PipelineConfig::default().without_delays().judge;
    judge::run_batch(store, &registry(), oracle, &cfg, THRESHOLD, &JudgeOptions::default())
        .await
        .unwrap()
}

fn score_of(store: &ItemStore, id: i64) -> (Option<f64>, Option<String>) {
    let it = store.get(id).unwrap().unwrap();
    (it.relevance_score, it.relevance_reason)
}

#[tokio::test]
async fn oracle_scores_are_clamped() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add(&store, "rust-blog", "a", LONG_SUMMARY);
    let high = MockOracle::fixed(150, "very relevant");
    judge_all(&store, &high).await;
    assert_eq!(score_of(&store, id), (Some(100.0), Some("very relevant".into())));

    let store = ItemStore::open_in_memory().unwrap();
    let id = add(&store, "rust-blog", "a", LONG_SUMMARY);
    let low = MockOracle::fixed(-5, "off topic");
    let summary = judge_all(&store, &low).await;
    assert_eq!(score_of(&store, id).0, Some(0.0));
    assert_eq!(summary.rejected, 1);
}

#[tokio::test]
async fn short_content_is_scored_without_the_oracle() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add(&store, "rust-blog", "short", "Thirty characters of text here");
    let oracle = MockOracle::fixed(90, "unused");

    let summary = judge_all(&store, &oracle).await;
    assert_eq!(oracle.calls(), 0);
    assert_eq!(summary.short_content, 1);

    let (score, reason) = score_of(&store, id);
    assert_eq!(score, Some(40.0));
    assert_eq!(reason.as_deref(), Some("content too short to judge (30 chars)"));
}

#[tokio::test]
async fn sources_without_criteria_get_the_neutral_score() {
    let store = ItemStore::open_in_memory().unwrap();
    let blank = add(&store, "misc", "a", LONG_SUMMARY);
    let unknown = add(&store, "vanished", "b", LONG_SUMMARY);
    let oracle = MockOracle::fixed(90, "unused");

    let summary = judge_all(&store, &oracle).await;
    assert_eq!(oracle.calls(), 0);
    assert_eq!(summary.no_criteria, 2);
    for id in [blank, unknown] {
        assert_eq!(score_of(&store, id), (Some(50.0), Some(NO_CRITERIA_REASON.into())));
    }
}

#[tokio::test]
async fn oracle_failure_falls_back_to_error_score() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add(&store, "rust-blog", "a", LONG_SUMMARY);
    let oracle = MockOracle::failing();

    let summary = judge_all(&store, &oracle).await;
    assert_eq!(summary.errors, 1);
    assert_eq!(
        score_of(&store, id),
        (Some(40.0), Some("scoring error: malformed".into()))
    );
}

#[tokio::test]
async fn scores_are_sticky_until_reset() {
    let store = ItemStore::open_in_memory().unwrap();
    let a = add(&store, "rust-blog", "a", LONG_SUMMARY);
    let b = add(&store, "misc", "b", LONG_SUMMARY);

    let first = MockOracle::fixed(70, "first opinion");
    judge_all(&store, &first).await;
    assert_eq!(first.calls(), 1);

    let second = MockOracle::fixed(10, "second opinion");
    let summary = judge_all(&store, &second).await;
    assert_eq!(summary.judged, 0);
    assert_eq!(second.calls(), 0);
    assert_eq!(score_of(&store, a).0, Some(70.0));

    let cleared = judge::reset_scores(&store, Some("rust-blog")).unwrap();
    assert_eq!(cleared, 1);
    assert_eq!(score_of(&store, b).0, Some(50.0), "other sources keep their scores");

    judge_all(&store, &second).await;
    assert_eq!(score_of(&store, a), (Some(10.0), Some("second opinion".into())));
}

#[tokio::test]
async fn disabled_sources_are_left_unscored() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add(&store, "off", "a", LONG_SUMMARY);
    let oracle = MockOracle::fixed(80, "unused");

    let summary = judge_all(&store, &oracle).await;
    assert_eq!(summary.judged, 0);
    assert_eq!(score_of(&store, id), (None, None));
}

#[tokio::test]
async fn resolved_full_text_is_sampled_for_the_oracle() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add(&store, "rust-blog", "a", LONG_SUMMARY);
    store
        .mark_resolved(id, &"ß".repeat(5_000), Utc::now())
        .unwrap();
    let oracle = MockOracle::fixed(65, "case study");

    judge_all(&store, &oracle).await;
    let req = oracle.last_request().expect("oracle was called");
    assert!(req.full_text);
    assert_eq!(req.content.chars().count(), 3_000);
    assert_eq!(req.title, "Post a");
    assert_eq!(req.criteria, "Rust performance work, production case studies");
}

#[tokio::test]
async fn source_filter_and_limit_bound_the_batch() {
    let store = ItemStore::open_in_memory().unwrap();
    for i in 0..3 {
        add(&store, "rust-blog", &format!("r{i}"), LONG_SUMMARY);
    }
    let misc = add(&store, "misc", "m", LONG_SUMMARY);
    let oracle = MockOracle::fixed(55, "fine");
    let cfg = PipelineConfig::default().without_delays().judge;

    let opts = JudgeOptions {
        limit: Some(2),
        source: Some("rust-blog".into()),
    };
    let summary = judge::run_batch(&store, &registry(), &oracle, &cfg, THRESHOLD, &opts)
        .await
        .unwrap();
    assert_eq!(summary.judged, 2);
    assert_eq!(summary.kept, 2);
    assert_eq!(score_of(&store, misc).0, None);
}
