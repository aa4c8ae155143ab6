use crate::config::CrawlConfig;
use crate::data::{ResultStore, StoreError};
use crate::model::{CrawlCommand, SessionId, StreamRecord};
use linkweb_scanner::{CrawlSummary, Crawler, EdgeRecord, Fetcher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-session settings taken from [`CrawlConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_depth: u32,
    pub result_ttl: Duration,
}

impl From<&CrawlConfig> for SessionOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            result_ttl: config.result_ttl,
        }
    }
}

/// What one session wrote, reported when it finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub root_url: String,
    pub edges_written: usize,
    pub edges_dropped: usize,
    pub summary: CrawlSummary,
    pub elapsed: Duration,
}

/// Crawls `command.url` and streams every edge into the session's result
/// stream, finishing with exactly one completion record.
///
/// An edge that cannot be stored is logged and dropped; the crawl goes on.
/// The only error returned is a failure to write the completion record, since
/// readers would otherwise poll forever.
///
/// Store calls run on the blocking pool one at a time, in arrival order.
pub async fn run_session<F: Fetcher>(
    store: Arc<dyn ResultStore>,
    fetcher: F,
    command: CrawlCommand,
    options: SessionOptions,
) -> Result<SessionReport, StoreError> {
    let started = Instant::now();
    let CrawlCommand { url, session_id } = command;
    info!("Starting recursive crawl of {} (session {})", url, session_id);
    let ttl = options.result_ttl;

    // Expire up front so an abandoned session still goes away
    refresh_expiry(&store, &session_id, ttl).await;

    let crawler = Crawler::new(fetcher).with_max_depth(options.max_depth);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut root = crawler.start(&url, tx);

    let mut written = 0;
    let mut dropped = 0;
    let summary = loop {
        tokio::select! {
            Some(edge) = rx.recv() => {
                if store_edge(&store, &session_id, edge, ttl).await {
                    written += 1;
                } else {
                    dropped += 1;
                }
            }
            joined = &mut root => break match joined {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Crawl task for session {} failed: {}", session_id, e);
                    CrawlSummary::default()
                }
            },
        }
    };

    // Edges sent just before the root finished may still be buffered
    while let Ok(edge) = rx.try_recv() {
        if store_edge(&store, &session_id, edge, ttl).await {
            written += 1;
        } else {
            dropped += 1;
        }
    }

    on_blocking_pool(&store, {
        let session_id = session_id.clone();
        move |store: &dyn ResultStore| store.append(&session_id, &StreamRecord::done())
    })
    .await?;
    refresh_expiry(&store, &session_id, ttl).await;

    let report = SessionReport {
        session_id,
        root_url: url,
        edges_written: written,
        edges_dropped: dropped,
        summary,
        elapsed: started.elapsed(),
    };
    info!(
        "Done recursively crawling {} (session {}): {} edges written, {} dropped in {:?}",
        report.root_url,
        report.session_id,
        report.edges_written,
        report.edges_dropped,
        report.elapsed
    );
    Ok(report)
}

/// Runs one store call on the blocking pool and waits for it.
async fn on_blocking_pool<T, W>(store: &Arc<dyn ResultStore>, write: W) -> Result<T, StoreError>
where
    T: Send + 'static,
    W: FnOnce(&dyn ResultStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || write(store.as_ref())).await?
}

async fn refresh_expiry(store: &Arc<dyn ResultStore>, session_id: &SessionId, ttl: Duration) {
    let result = on_blocking_pool(store, {
        let session_id = session_id.clone();
        move |store: &dyn ResultStore| store.set_expiry(&session_id, ttl)
    })
    .await;
    if let Err(e) = result {
        warn!("Could not refresh expiry for session {}: {}", session_id, e);
    }
}

/// Appends one edge and pushes the expiry forward so a long crawl does not
/// outlive its own stream. Returns whether the edge was stored.
async fn store_edge(
    store: &Arc<dyn ResultStore>,
    session_id: &SessionId,
    edge: EdgeRecord,
    ttl: Duration,
) -> bool {
    let parent = edge.parent.clone();
    let appended = on_blocking_pool(store, {
        let session_id = session_id.clone();
        move |store: &dyn ResultStore| store.append(&session_id, &StreamRecord::Edge(edge))
    })
    .await;

    match appended {
        Ok(len) => {
            debug!("Session {}: stored edge #{} for {}", session_id, len - 1, parent);
            refresh_expiry(store, session_id, ttl).await;
            true
        }
        Err(e) => {
            error!("Dropping edge for {} in session {}: {}", parent, session_id, e);
            false
        }
    }
}
