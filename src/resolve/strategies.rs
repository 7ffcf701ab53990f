// src/resolve/strategies.rs
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use crate::ingest::http::BROWSER_USER_AGENT;
use crate::ingest::normalize_text;

pub const BRUTE_FORCE_MAX_CHARS: usize = 10_000;

/// One way of turning an article URL into plain text.
///
/// `Ok(None)` and `Err(_)` both mean "no result"; the resolver moves on to
/// the next strategy either way.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, url: &str, timeout: Duration) -> Result<Option<String>>;
}

/// A downloaded page stays reusable this long for the same link.
const PAGE_REUSE: Duration = Duration::from_secs(60);

/// Shared page download used by the built-in strategies.
///
/// Clones share the most recent download, failed ones included, so a chain
/// walking one link hits the origin once.
#[derive(Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    last: Arc<Mutex<Option<CachedPage>>>,
}

struct CachedPage {
    url: String,
    fetched: Instant,
    body: Result<Arc<[u8]>, String>,
}

impl PageFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("building page client")?;
        Ok(Self {
            client,
            last: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn get(&self, url: &str, timeout: Duration) -> Result<Arc<[u8]>> {
        if let Some(hit) = self.cached(url) {
            tracing::debug!(target: "resolve", url, "reusing downloaded page");
            return hit.map_err(anyhow::Error::msg);
        }
        let body: Result<Arc<[u8]>, String> = self
            .download(url, timeout)
            .await
            .map(Arc::from)
            .map_err(|e| format!("{e:#}"));
        if let Ok(mut last) = self.last.lock() {
            *last = Some(CachedPage {
                url: url.to_string(),
                fetched: Instant::now(),
                body: body.clone(),
            });
        }
        body.map_err(anyhow::Error::msg)
    }

    fn cached(&self, url: &str) -> Option<Result<Arc<[u8]>, String>> {
        let last = self.last.lock().ok()?;
        last.as_ref()
            .filter(|page| page.url == url && page.fetched.elapsed() < PAGE_REUSE)
            .map(|page| page.body.clone())
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let parsed = url::Url::parse(url).context("Invalid URL")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            bail!("Only http/https URLs are allowed, got: {}", parsed.scheme());
        }
        let resp = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .context("page request failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("page returned HTTP {}", status.as_u16());
        }
        Ok(resp.bytes().await.context("reading page body")?.to_vec())
    }
}

/// Readability scoring plus main-content detection, rendered as Markdown.
pub struct ReadabilityStrategy {
    pages: PageFetcher,
}

/// Main-content detection alone; catches pages Readability rejects.
pub struct MainContentStrategy {
    pages: PageFetcher,
}

/// Drop boilerplate blocks, strip every tag, keep whatever text is left.
pub struct BruteForceStrategy {
    pages: PageFetcher,
}

impl ReadabilityStrategy {
    pub fn new(pages: PageFetcher) -> Self {
        Self { pages }
    }
}

impl MainContentStrategy {
    pub fn new(pages: PageFetcher) -> Self {
        Self { pages }
    }
}

impl BruteForceStrategy {
    pub fn new(pages: PageFetcher) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl ExtractionStrategy for ReadabilityStrategy {
    fn name(&self) -> &str {
        "readability"
    }

    async fn extract(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let html = self.pages.get(url, timeout).await?;
        Ok(non_empty(transform_html(url, &html, true)))
    }
}

#[async_trait]
impl ExtractionStrategy for MainContentStrategy {
    fn name(&self) -> &str {
        "main-content"
    }

    async fn extract(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let html = self.pages.get(url, timeout).await?;
        Ok(non_empty(transform_html(url, &html, false)))
    }
}

#[async_trait]
impl ExtractionStrategy for BruteForceStrategy {
    fn name(&self) -> &str {
        "brute-force"
    }

    async fn extract(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let html = self.pages.get(url, timeout).await?;
        Ok(non_empty(brute_force_text(&String::from_utf8_lossy(&html))))
    }
}

/// Most precise first.
pub fn default_chain() -> Result<Vec<Box<dyn ExtractionStrategy>>> {
    let pages = PageFetcher::new()?;
    Ok(vec![
        Box::new(ReadabilityStrategy::new(pages.clone())),
        Box::new(MainContentStrategy::new(pages.clone())),
        Box::new(BruteForceStrategy::new(pages)),
    ])
}

pub fn transform_html(url: &str, html: &[u8], readability: bool) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    transform_content_input(input, &config)
}

pub fn brute_force_text(html: &str) -> String {
    static RE_BLOCKS: OnceCell<Vec<Regex>> = OnceCell::new();
    let blocks = RE_BLOCKS.get_or_init(|| {
        let mut v = vec![Regex::new(r"(?s)<!--.*?-->").expect("comment regex")];
        for tag in [
            "script", "style", "nav", "header", "footer", "aside", "noscript",
        ] {
            v.push(
                Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                    .expect("boilerplate block regex"),
            );
        }
        v
    });

    let mut out = html.to_string();
    for re in blocks {
        out = re.replace_all(&out, " ").into_owned();
    }
    normalize_text(&out, BRUTE_FORCE_MAX_CHARS)
}

fn non_empty(text: String) -> Option<String> {
    let t = text.trim();
    (!t.is_empty()).then(|| t.to_string())
}
