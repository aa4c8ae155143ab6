use crate::server::{self, ApiState, DEFAULT_ALLOWED_ORIGINS, LookupResponse};
use anyhow::{Context, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use linkweb_core::bus::CommandBus;
use linkweb_core::config::CrawlConfig;
use linkweb_core::crawl::{SessionOptions, run_session};
use linkweb_core::data::{MemoryResultStore, ResultStore, SqliteResultStore};
use linkweb_core::model::{CrawlCommand, SessionId};
use linkweb_core::pagination::{Cursor, read_page};
use linkweb_core::service::{CrawlService, FetcherFactory, HttpFetcherFactory};
use linkweb_scanner::{EdgeRecord, build_client};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const CRAWL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Builds the crawl settings from the tuning flags, falling back to the
/// defaults for flags a subcommand does not define.
pub fn config_from_args(args: &ArgMatches) -> anyhow::Result<CrawlConfig> {
    let mut config = CrawlConfig::default();

    if let Some(depth) = get_optional::<u32>(args, "max-depth") {
        config = config.with_max_depth(depth);
    }
    if let Some(links) = get_optional::<usize>(args, "max-links") {
        config = config.with_max_links_per_page(links);
    }
    if let Some(concurrency) = get_optional::<usize>(args, "concurrency") {
        config = config.with_max_concurrency(concurrency);
    }
    if let Some(secs) = get_optional::<u64>(args, "fetch-timeout") {
        config = config.with_fetch_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = get_optional::<u64>(args, "result-ttl") {
        config = config.with_result_ttl(Duration::from_secs(secs));
    }

    config.validate().context("Invalid crawl settings")?;
    Ok(config)
}

fn get_optional<T: Clone + Send + Sync + 'static>(args: &ArgMatches, id: &str) -> Option<T> {
    args.try_get_one::<T>(id).ok().flatten().cloned()
}

/// Expands `~` in a database path.
pub fn expand_db_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Opens the result store selected by `--memory` / `--db`. `--memory` wins
/// when both are present, including a `--db` taken from the environment.
pub fn open_store(args: &ArgMatches) -> anyhow::Result<Arc<dyn ResultStore>> {
    if get_optional::<bool>(args, "memory").unwrap_or(false) {
        info!("Keeping result streams in memory");
        return Ok(Arc::new(MemoryResultStore::new()));
    }

    let db_path = db_path_from_args(args)?;
    let store = SqliteResultStore::new(&db_path)
        .with_context(|| format!("Failed to open results database at {}", db_path.display()))?;
    info!("Result streams stored in {}", db_path.display());
    Ok(Arc::new(store))
}

fn db_path_from_args(args: &ArgMatches) -> anyhow::Result<PathBuf> {
    let raw = args
        .get_one::<String>("db")
        .context("No results database path given")?;
    Ok(expand_db_path(raw))
}

/// Opens an existing results database without creating one.
fn open_existing_store(args: &ArgMatches) -> anyhow::Result<SqliteResultStore> {
    let db_path = db_path_from_args(args)?;
    if !SqliteResultStore::exists(&db_path) {
        bail!("No results database at {}", db_path.display());
    }
    SqliteResultStore::new(&db_path)
        .with_context(|| format!("Failed to open results database at {}", db_path.display()))
}

/// CORS origins from `--allow-origin`, or the local dev servers when none are given.
pub fn allowed_origins(args: &ArgMatches) -> Vec<String> {
    match args.try_get_many::<String>("allow-origin").ok().flatten() {
        Some(origins) => origins.cloned().collect(),
        None => DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
    }
}

pub async fn handle_serve(args: &ArgMatches) -> anyhow::Result<()> {
    let config = config_from_args(args)?;
    let store = open_store(args)?;
    let bind = args
        .get_one::<String>("bind")
        .cloned()
        .unwrap_or_else(|| crate::commands::DEFAULT_BIND.to_string());

    let client = build_client(config.fetch_timeout).context("Failed to build HTTP client")?;
    let fetchers = HttpFetcherFactory::new(client, &config);
    info!(
        "Crawl settings: depth {}, {} links per page, {} concurrent fetches, {:?} timeout, {:?} result TTL",
        config.max_depth,
        config.max_links_per_page,
        config.max_concurrency,
        config.fetch_timeout,
        config.result_ttl
    );

    let service = Arc::new(CrawlService::new(config, fetchers, store.clone()));
    let bus = CommandBus::default();
    let worker = service.clone().run(bus.subscribe());
    let purger = service.spawn_purger();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    let state = ApiState::new(bus, store, bind.clone());
    let router = server::build_router(state, &allowed_origins(args));

    let served = server::serve(listener, router).await;
    purger.abort();
    worker.abort();
    served.context("HTTP server error")
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    let root = args.get_one::<Url>("URL").context("No URL given")?;
    let as_json = args.get_flag("json");
    let config = config_from_args(args)?;

    let client = build_client(config.fetch_timeout).context("Failed to build HTTP client")?;
    let fetcher = HttpFetcherFactory::new(client, &config).make();
    let store = Arc::new(MemoryResultStore::new());
    let session_id = SessionId::generate();
    let command = CrawlCommand::new(root.as_str(), session_id.clone());

    if !quiet && !as_json {
        println!("\n{} {}", "Crawling".bright_white().bold(), root.as_str().bright_cyan());
        println!(
            "  depth {}, {} links per page, {} concurrent fetches\n",
            config.max_depth, config.max_links_per_page, config.max_concurrency
        );
    }

    let spinner = if quiet || as_json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };
    spinner.set_message("waiting for the first page...");

    let session = {
        let store = store.clone();
        let options = SessionOptions::from(&config);
        tokio::spawn(async move { run_session(store, fetcher, command, options).await })
    };

    let mut cursor = Cursor::start(session_id);
    let mut seen = 0;
    loop {
        let finished = session.is_finished();
        let page = read_page(store.as_ref(), &cursor)?;
        for edge in &page.edges {
            seen += 1;
            if as_json {
                println!("{}", serde_json::to_string(edge)?);
            } else {
                spinner.println(format_edge(edge));
            }
        }
        spinner.set_message(format!("{} pages so far", seen));

        match page.next {
            None => break,
            Some(_) if finished => {
                warn!("Crawl task ended without a completion record");
                break;
            }
            Some(next) => {
                cursor = next;
                tokio::time::sleep(CRAWL_POLL_INTERVAL).await;
            }
        }
    }
    spinner.finish_and_clear();

    let report = session.await.context("Crawl task failed")??;
    if !as_json {
        println!(
            "\n{} {} pages fetched, {} failed, {} already visited in {:.2?}",
            "✓".green().bold(),
            report.summary.fetched,
            report.summary.failed,
            report.summary.skipped,
            report.elapsed
        );
    }
    Ok(())
}

/// One edge as a line of terminal output.
pub fn format_edge(edge: &EdgeRecord) -> String {
    let mut line = format!(
        "{} {} {}",
        "→".blue(),
        edge.parent.bright_white(),
        format!("(depth {}, {} links)", edge.depth, edge.children.len()).dimmed()
    );
    for child in &edge.children {
        line.push_str(&format!("\n    {}", child.dimmed()));
    }
    line
}

pub fn handle_read(args: &ArgMatches) -> anyhow::Result<()> {
    let raw_id = args.get_one::<String>("SESSION_ID").context("No session id given")?;
    let session_id = SessionId::parse(raw_id)?;
    let start_index = args.get_one::<usize>("start-index").copied().unwrap_or(0);
    let host = args
        .get_one::<String>("host")
        .map(String::as_str)
        .unwrap_or("localhost:8080");

    let store = open_existing_store(args)?;
    let page = read_page(&store, &Cursor::new(session_id, start_index))?;
    let response = LookupResponse::from_page(page, host);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub fn handle_purge(args: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    let store = open_existing_store(args)?;
    let removed = store.purge_expired()?;
    if !quiet {
        println!("{} Purged {} expired result streams", "✓".green().bold(), removed);
    }
    Ok(())
}
