// tests/extract_text.rs
//! Page-to-text extraction on a saved article page, and the built-in chain
//! against a local origin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{http::StatusCode, response::Html, routing::get, Router};
use chrono::Utc;
use feed_curator::config::PipelineConfig;
use feed_curator::resolve::{
    self, default_chain,
    strategies::{brute_force_text, transform_html},
    ResolveOptions,
};
use feed_curator::store::{ItemStore, NewItem};

const ARTICLE: &str = include_str!("fixtures/article.html");
const URL: &str = "https://systems.example/posts/async-runtimes";

#[test]
fn brute_force_keeps_article_and_drops_chrome() {
    let text = brute_force_text(ARTICLE);
    assert!(text.contains("Work-stealing schedulers move tasks"));
    assert!(text.contains("cancellation tokens"));
    for chrome in ["Archive", "analytics", "Related posts", "font-family", "©"] {
        assert!(!text.contains(chrome), "leaked {chrome:?}: {text}");
    }
    assert!(resolve::accepts(&text, 500), "fixture article is long enough to resolve");
}

#[test]
fn main_content_transform_keeps_paragraphs() {
    let text = transform_html(URL, ARTICLE.as_bytes(), false);
    assert!(text.contains("Timer wheels trade precision"), "got: {text}");
    assert!(!text.contains("window.analytics"));
}

/// Serves a page too thin to resolve and a 404, counting every request.
async fn counting_origin() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let (thin, gone) = (hits.clone(), hits.clone());
    let app = Router::new()
        .route(
            "/thin",
            get(move || async move {
                thin.fetch_add(1, Ordering::SeqCst);
                Html("<html><body><p>Too short to keep.</p></body></html>")
            }),
        )
        .route(
            "/gone",
            get(move || async move {
                gone.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

#[tokio::test]
async fn built_in_chain_downloads_each_link_once() {
    let (base, hits) = counting_origin().await;
    let store = ItemStore::open_in_memory().unwrap();
    for path in ["thin", "gone"] {
        let item = NewItem {
            source_name: "local".into(),
            fetch_address: format!("{base}/feed"),
            link: Some(format!("{base}/{path}")),
            title: path.into(),
            published_at: Utc::now(),
            summary: "teaser".into(),
        };
        store.upsert(&item, Utc::now()).unwrap();
    }

    let chain = default_chain().unwrap();
    assert_eq!(chain.len(), 3);
    let cfg = PipelineConfig::default().without_delays().resolve;
    let summary = resolve::run_batch(&store, &chain, &cfg, &ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.unresolved, 2);
    assert_eq!(
        hits.load(Ordering::SeqCst),
        2,
        "three strategies per item share one download, failed or not"
    );
}
