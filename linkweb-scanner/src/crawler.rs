use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::result::{CrawlSummary, EdgeRecord};
use crate::visited::VisitedGuard;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Depth-bounded recursive crawler.
///
/// Every discovered link gets its own task; the only limit on network
/// concurrency is whatever the [`Fetcher`] enforces.
pub struct Crawler<F: Fetcher> {
    fetcher: Arc<F>,
    max_depth: u32,
}

/// State shared by every invocation of one crawl.
struct CrawlContext<F> {
    fetcher: Arc<F>,
    visited: VisitedGuard,
    edges: UnboundedSender<EdgeRecord>,
    started: Instant,
    fetched: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl<F> CrawlContext<F> {
    fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            fetched: self.fetched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

impl<F: Fetcher> Crawler<F> {
    pub fn new(fetcher: F) -> Self {
        Self::from_shared(Arc::new(fetcher))
    }

    pub fn from_shared(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            max_depth: 3,
        }
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Starts a crawl from `root_url`, sending each edge to `edges` as soon as
    /// its page has been fetched.
    ///
    /// Each call gets its own visited set and start time. The returned handle
    /// resolves once the root invocation and all of its descendants are done.
    pub fn start(&self, root_url: &str, edges: UnboundedSender<EdgeRecord>) -> JoinHandle<CrawlSummary> {
        info!("Starting crawl of {} to depth {}", root_url, self.max_depth);

        let ctx = Arc::new(CrawlContext {
            fetcher: self.fetcher.clone(),
            visited: VisitedGuard::new(),
            edges,
            started: Instant::now(),
            fetched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        });
        let root = root_url.to_string();
        let depth = self.max_depth;

        tokio::spawn(async move {
            visit(ctx.clone(), root.clone(), depth).await;
            let summary = ctx.summary();
            info!(
                "Crawl of {} complete: {} fetched, {} failed, {} skipped, {} distinct URLs",
                root,
                summary.fetched,
                summary.failed,
                summary.skipped,
                ctx.visited.len()
            );
            summary
        })
    }

    /// Runs a crawl to completion and returns its edges in discovery order.
    pub async fn crawl(&self, root_url: &str) -> Result<Vec<EdgeRecord>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = self.start(root_url, tx);

        let mut edges = Vec::new();
        while let Some(edge) = rx.recv().await {
            edges.push(edge);
        }
        handle.await?;

        Ok(edges)
    }
}

/// One node of the traversal: claim, fetch, emit, fan out, then wait for
/// exactly as many children as were spawned.
fn visit<F: Fetcher>(ctx: Arc<CrawlContext<F>>, url: String, remaining: u32) -> BoxFuture<'static, ()> {
    async move {
        if remaining == 0 {
            return;
        }

        if ctx.visited.flip(&url) {
            debug!("Skipping {} (already visited)", url);
            ctx.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let children = match ctx.fetcher.fetch(&url).await {
            Ok(links) => links,
            Err(e) => {
                warn!("Crawl error for {}: {}", url, e);
                ctx.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        ctx.fetched.fetch_add(1, Ordering::Relaxed);

        let edge = EdgeRecord::new(url.clone(), children.clone(), ctx.started.elapsed(), remaining);
        if ctx.edges.send(edge).is_err() {
            warn!("Edge receiver closed, dropping edge for {}", url);
        }

        let handles: Vec<JoinHandle<()>> = children
            .into_iter()
            .map(|child| tokio::spawn(visit(ctx.clone(), child, remaining - 1)))
            .collect();

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!("Child task of {} failed: {}", url, e);
            }
        }
    }
    .boxed()
}
