// tests/resolve_chain.rs
//! Full-text resolution with scripted extraction strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_curator::config::PipelineConfig;
use feed_curator::resolve::{self, ExtractionStrategy, ResolveOptions};
use feed_curator::store::{ItemStore, NewItem, ResolutionState, UpsertOutcome};

#[derive(Clone)]
enum Script {
    Text(String),
    Nothing,
    Fail,
}

struct Scripted {
    name: &'static str,
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn boxed(name: &'static str, script: Script) -> (Box<dyn ExtractionStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let s = Scripted {
            name,
            script,
            calls: calls.clone(),
        };
        (Box::new(s), calls)
    }
}

#[async_trait]
impl ExtractionStrategy for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn extract(&self, _url: &str, _timeout: Duration) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Text(t) => Ok(Some(t.clone())),
            Script::Nothing => Ok(None),
            Script::Fail => Err(anyhow::anyhow!("connection reset")),
        }
    }
}

fn long_text(marker: &str) -> String {
    format!("{marker} {}", "word ".repeat(200))
}

fn add_item(store: &ItemStore, source: &str, link: Option<&str>, published_at: DateTime<Utc>) -> i64 {
    let item = NewItem {
        source_name: source.to_string(),
        fetch_address: format!("https://{source}.example/feed"),
        link: link.map(str::to_string),
        title: format!("Item {}", link.unwrap_or("without link")),
        published_at,
        summary: "A short feed summary.".to_string(),
    };
    match store.upsert(&item, Utc::now()).unwrap() {
        UpsertOutcome::Inserted(id) => id,
        UpsertOutcome::Touched => panic!("link already stored"),
    }
}

fn resolve_cfg() -> feed_curator::config::pipeline::ResolveCfg {
    PipelineConfig::default().without_delays().resolve
}

#[tokio::test]
async fn first_acceptable_strategy_wins() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add_item(&store, "blog", Some("https://blog.example/a"), Utc::now());

    let (first, first_calls) = Scripted::boxed("readability", Script::Text(long_text("from readability")));
    let (second, second_calls) = Scripted::boxed("brute_force", Script::Text(long_text("from brute force")));
    let chain = vec![first, second];

    let summary = resolve::run_batch(&store, &chain, &resolve_cfg(), &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.resolved, 1);
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let item = store.get(id).unwrap().unwrap();
    assert_eq!(item.resolution_state, ResolutionState::Resolved);
    assert!(item.full_text.unwrap().starts_with("from readability"));
    assert!(item.resolution_attempted_at.is_some());
}

#[tokio::test]
async fn cruder_strategy_rescues_after_short_and_failing_ones() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add_item(&store, "blog", Some("https://blog.example/a"), Utc::now());

    let (short, _) = Scripted::boxed("readability", Script::Text("Too short to count.".into()));
    let (broken, _) = Scripted::boxed("main_content", Script::Fail);
    let (crude, crude_calls) = Scripted::boxed("brute_force", Script::Text(long_text("rescued")));
    let chain = vec![short, broken, crude];

    let summary = resolve::run_batch(&store, &chain, &resolve_cfg(), &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(crude_calls.load(Ordering::SeqCst), 1);
    let item = store.get(id).unwrap().unwrap();
    assert!(item.full_text.unwrap().starts_with("rescued"));
}

#[tokio::test]
async fn exhausted_chain_marks_unresolved_and_keeps_summary() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add_item(&store, "blog", Some("https://blog.example/a"), Utc::now());

    let (a, _) = Scripted::boxed("readability", Script::Nothing);
    let (b, _) = Scripted::boxed("brute_force", Script::Fail);
    let chain = vec![a, b];

    let summary = resolve::run_batch(&store, &chain, &resolve_cfg(), &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.unresolved, 1);

    let item = store.get(id).unwrap().unwrap();
    assert_eq!(item.resolution_state, ResolutionState::Unresolved);
    assert!(item.full_text.is_none());
    assert_eq!(item.summary, "A short feed summary.");
    assert_eq!(item.best_text(), ("A short feed summary.", false));

    // Within the cooldown the item is not offered again.
    let again = resolve::run_batch(&store, &chain, &resolve_cfg(), &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(again.attempted, 0);
}

#[tokio::test]
async fn forced_failure_never_downgrades_a_resolved_item() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add_item(&store, "blog", Some("https://blog.example/a"), Utc::now());

    let (good, _) = Scripted::boxed("readability", Script::Text(long_text("original")));
    resolve::run_batch(&store, &[good], &resolve_cfg(), &ResolveOptions::default())
        .await
        .unwrap();

    let (bad, bad_calls) = Scripted::boxed("readability", Script::Fail);
    let forced = ResolveOptions {
        force: true,
        ..ResolveOptions::default()
    };
    let summary = resolve::run_batch(&store, &[bad], &resolve_cfg(), &forced)
        .await
        .unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(bad_calls.load(Ordering::SeqCst), 1);

    let item = store.get(id).unwrap().unwrap();
    assert_eq!(item.resolution_state, ResolutionState::Resolved);
    assert!(item.full_text.unwrap().starts_with("original"));
}

#[tokio::test]
async fn text_of_exactly_min_chars_is_rejected() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add_item(&store, "blog", Some("https://blog.example/a"), Utc::now());
    let cfg = resolve_cfg();

    let (exact, _) = Scripted::boxed("readability", Script::Text("x".repeat(cfg.min_chars)));
    resolve::run_batch(&store, &[exact], &cfg, &ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(
        store.get(id).unwrap().unwrap().resolution_state,
        ResolutionState::Unresolved
    );

    let (one_more, _) = Scripted::boxed("readability", Script::Text("x".repeat(cfg.min_chars + 1)));
    let forced = ResolveOptions {
        force: true,
        ..ResolveOptions::default()
    };
    resolve::run_batch(&store, &[one_more], &cfg, &forced).await.unwrap();
    assert_eq!(
        store.get(id).unwrap().unwrap().resolution_state,
        ResolutionState::Resolved
    );
}

#[tokio::test]
async fn stored_text_is_capped() {
    let store = ItemStore::open_in_memory().unwrap();
    let id = add_item(&store, "blog", Some("https://blog.example/a"), Utc::now());
    let mut cfg = resolve_cfg();
    cfg.max_stored_chars = 800;

    let (huge, _) = Scripted::boxed("readability", Script::Text("ü".repeat(5_000)));
    resolve::run_batch(&store, &[huge], &cfg, &ResolveOptions::default())
        .await
        .unwrap();
    let text = store.get(id).unwrap().unwrap().full_text.unwrap();
    assert_eq!(text.chars().count(), 800);
}

#[tokio::test]
async fn filters_limit_the_batch() {
    let store = ItemStore::open_in_memory().unwrap();
    let now = Utc::now();
    let recent = add_item(&store, "blog", Some("https://blog.example/recent"), now - chrono::Duration::days(1));
    let old = add_item(&store, "blog", Some("https://blog.example/old"), now - chrono::Duration::days(40));
    let other = add_item(&store, "news", Some("https://news.example/x"), now);
    let linkless = add_item(&store, "blog", None, now);

    let (s, calls) = Scripted::boxed("readability", Script::Text(long_text("ok")));
    let chain = vec![s];

    let opts = ResolveOptions {
        source: Some("blog".into()),
        max_age_days: Some(7),
        ..ResolveOptions::default()
    };
    let summary = resolve::run_batch(&store, &chain, &resolve_cfg(), &opts).await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let state = |id| store.get(id).unwrap().unwrap().resolution_state;
    assert_eq!(state(recent), ResolutionState::Resolved);
    assert_eq!(state(old), ResolutionState::Pending);
    assert_eq!(state(other), ResolutionState::Pending);
    assert_eq!(state(linkless), ResolutionState::Pending);

    let limited = ResolveOptions {
        limit: Some(1),
        ..ResolveOptions::default()
    };
    let summary = resolve::run_batch(&store, &chain, &resolve_cfg(), &limited).await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(state(other), ResolutionState::Resolved, "newest pending item goes first");
}
