//! feed-curator — CLI entrypoint.
//! Each subcommand runs one pipeline stage (or the whole cycle) against the
//! item store; `serve` exposes the curated feed over HTTP.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use feed_curator::api::{self, AppState};
use feed_curator::config::{
    load_registry_default, load_registry_from, OracleConfig, PipelineConfig, SourceRegistry,
};
use feed_curator::judge::{self, JudgeOptions};
use feed_curator::metrics::Metrics;
use feed_curator::pipeline::Pipeline;
use feed_curator::publish::{render_rss, ChannelMeta};
use feed_curator::resolve::ResolveOptions;
use feed_curator::select::{self, SelectionPolicy};
use feed_curator::store::ItemStore;

#[derive(Parser)]
#[command(name = "feed-curator", version, about = "Fetch, resolve, judge and select feed items")]
struct Cli {
    /// Source registry (TOML or JSON). Defaults to $SOURCES_CONFIG_PATH, then config/sources.{toml,json}
    #[arg(long, global = true)]
    sources: Option<PathBuf>,

    /// Pipeline tunables (TOML). Defaults to $PIPELINE_CONFIG_PATH, then config/pipeline.toml
    #[arg(long, global = true)]
    pipeline: Option<PathBuf>,

    /// SQLite item store; overrides [store].path and $CURATOR_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the item store and its schema
    Init,
    /// Poll every enabled source once
    Fetch,
    /// Resolve full text for pending items
    Fulltext {
        #[arg(long)]
        limit: Option<usize>,
        /// Re-resolve regardless of state (a resolved item is never downgraded)
        #[arg(long)]
        force: bool,
        /// Only items from this source
        #[arg(long)]
        feed: Option<String>,
        /// Only items published in the last N days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Score unjudged items
    Judge {
        #[arg(long)]
        feed: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Clear scores so items are judged again
    ResetScores {
        #[arg(long)]
        feed: Option<String>,
    },
    /// Scoring statistics
    Stats,
    /// Print the current selection
    Select {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Render the selection to an RSS file
    Rebuild {
        #[arg(long, default_value = "data/feed.xml")]
        out: PathBuf,
    },
    /// Fetch, prefetch full text, judge
    Run,
    /// Serve the curated feed over HTTP
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Delete items not seen by the fetcher for N days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("feed_curator=info,ingest=info,resolve=info,judge=info,select=info,api=info,warn")
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    let mut config = match &cli.pipeline {
        Some(p) => {
            let mut c = PipelineConfig::load_from_file(p)?;
            c.apply_env_overrides();
            c
        }
        None => PipelineConfig::load_default()?,
    };
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }

    match cli.command {
        Command::Init => {
            let store = open_store(&config)?;
            println!("item store ready at {} ({} items)", config.store.path.display(), store.count()?);
        }
        Command::Fetch => {
            let pipeline = build_pipeline(cli.sources.as_deref(), config)?;
            let summary = pipeline.fetch().await;
            for r in &summary.reports {
                println!("{:<32} {}", r.source, serde_json::to_string(&r.outcome)?);
            }
            println!(
                "inserted {} new items ({} sources fetched, {} failed)",
                summary.inserted,
                summary.fetched(),
                summary.failed()
            );
        }
        Command::Fulltext {
            limit,
            force,
            feed,
            days,
        } => {
            let pipeline = build_pipeline(cli.sources.as_deref(), config)?;
            let opts = ResolveOptions {
                limit,
                force,
                source: feed,
                max_age_days: days,
            };
            let s = pipeline.resolve(&opts).await?;
            println!(
                "attempted {}, resolved {}, unresolved {}",
                s.attempted, s.resolved, s.unresolved
            );
        }
        Command::Judge { feed, limit } => {
            let pipeline = build_pipeline(cli.sources.as_deref(), config)?;
            let s = pipeline
                .judge(&JudgeOptions {
                    limit,
                    source: feed,
                })
                .await?;
            println!(
                "judged {} (oracle {}, short {}, no criteria {}, errors {}) kept {} rejected {}",
                s.judged, s.oracle_calls, s.short_content, s.no_criteria, s.errors, s.kept, s.rejected
            );
        }
        Command::ResetScores { feed } => {
            let store = open_store(&config)?;
            let n = judge::reset_scores(&store, feed.as_deref())?;
            println!("cleared {n} scores");
        }
        Command::Stats => {
            let store = open_store(&config)?;
            print_stats(&store, config.select.threshold)?;
        }
        Command::Select {
            threshold,
            limit,
            json,
        } => {
            let store = open_store(&config)?;
            let mut policy = SelectionPolicy::from(&config.select);
            if let Some(t) = threshold {
                policy.threshold = t;
            }
            if let Some(l) = limit {
                policy.limit = l;
            }
            let items = select::select(&store, &policy, Utc::now())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for it in &items {
                    println!(
                        "{:>5.1}  {}  {:<20}  {}",
                        it.relevance_score.unwrap_or_default(),
                        it.published_at.format("%Y-%m-%d"),
                        it.source_name,
                        it.title
                    );
                }
                println!("{} items", items.len());
            }
        }
        Command::Rebuild { out } => {
            let store = open_store(&config)?;
            let items = select::select(&store, &SelectionPolicy::from(&config.select), Utc::now())?;
            let xml = render_rss(&ChannelMeta::from(&config.serve), &items, Utc::now())?;
            if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&out, xml).with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {} items to {}", items.len(), out.display());
        }
        Command::Run => {
            let pipeline = build_pipeline(cli.sources.as_deref(), config)?;
            let report = pipeline.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.serve.bind.clone());
            serve(config, &bind).await?;
        }
        Command::Cleanup { days } => {
            let store = open_store(&config)?;
            let cutoff = Utc::now() - chrono::Duration::days(days);
            let n = store.prune_unseen_before(cutoff)?;
            println!("deleted {n} items not seen since {}", cutoff.format("%Y-%m-%d"));
        }
    }

    Ok(())
}

fn open_store(config: &PipelineConfig) -> Result<ItemStore> {
    ItemStore::open(&config.store.path)
}

fn load_registry(path: Option<&Path>) -> Result<SourceRegistry> {
    let registry = match path {
        Some(p) => load_registry_from(p)?,
        None => load_registry_default()?,
    };
    tracing::info!(
        sources = registry.len(),
        enabled = registry.enabled().count(),
        "source registry loaded"
    );
    Ok(registry)
}

fn build_pipeline(sources: Option<&Path>, config: PipelineConfig) -> Result<Pipeline> {
    let registry = load_registry(sources)?;
    let store = open_store(&config)?;
    let oracle_cfg = OracleConfig::load_default()?;
    Pipeline::from_config(store, registry, config, &oracle_cfg)
}

fn print_stats(store: &ItemStore, threshold: f64) -> Result<()> {
    let s = store.scoring_stats(threshold)?;
    println!("items:      {}", s.total);
    println!("scored:     {} ({:.1}%)", s.scored, s.scoring_rate());
    if let Some(avg) = s.avg_score {
        println!("avg score:  {avg:.1}");
    }
    println!("kept:       {} (score >= {threshold})", s.kept);
    println!("rejected:   {}", s.rejected);
    println!("full text:  {} resolved, {} unresolved", s.resolved, s.unresolved);
    if !s.per_source.is_empty() {
        println!();
        println!("{:<32} {:>7} {:>6} {:>5} {:>9}", "source", "scored", "avg", "kept", "fulltext");
        for src in &s.per_source {
            println!(
                "{:<32} {:>7} {:>6.1} {:>5} {:>9}",
                src.name, src.scored, src.avg_score, src.kept, src.with_full_text
            );
        }
    }
    Ok(())
}

async fn serve(config: PipelineConfig, bind: &str) -> Result<()> {
    let store = open_store(&config)?;
    let policy = SelectionPolicy::from(&config.select);
    let ttl = Duration::from_secs(config.serve.cache_ttl_secs);
    let metrics = Metrics::init(config.serve.cache_ttl_secs)?;

    let state = AppState::new(store.clone(), policy, ChannelMeta::from(&config.serve), ttl);
    let app = api::router(state).merge(metrics.router(store, policy.threshold));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(target: "api", %bind, "serving curated feed");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
