use crate::bus::Subscription;
use crate::config::CrawlConfig;
use crate::crawl::{SessionOptions, SessionReport, run_session};
use crate::data::{ResultStore, StoreError};
use crate::model::CrawlCommand;
use linkweb_scanner::{Fetcher, HttpFetcher};
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Produces a fresh fetcher for each session, so sessions never share a
/// concurrency budget.
pub trait FetcherFactory: Send + Sync + 'static {
    type Fetcher: Fetcher;

    fn make(&self) -> Self::Fetcher;
}

impl<T, F> FetcherFactory for T
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Fetcher,
{
    type Fetcher = F;

    fn make(&self) -> F {
        self()
    }
}

/// Builds [`HttpFetcher`]s over one shared HTTP client.
#[derive(Clone)]
pub struct HttpFetcherFactory {
    client: Client,
    max_concurrency: usize,
    max_links: usize,
}

impl HttpFetcherFactory {
    pub fn new(client: Client, config: &CrawlConfig) -> Self {
        Self {
            client,
            max_concurrency: config.max_concurrency,
            max_links: config.max_links_per_page,
        }
    }
}

impl FetcherFactory for HttpFetcherFactory {
    type Fetcher = HttpFetcher;

    fn make(&self) -> HttpFetcher {
        HttpFetcher::new(self.client.clone(), self.max_concurrency, self.max_links)
    }
}

/// Turns crawl commands into running sessions.
pub struct CrawlService<M: FetcherFactory> {
    config: CrawlConfig,
    fetchers: M,
    store: Arc<dyn ResultStore>,
}

impl<M: FetcherFactory> CrawlService<M> {
    pub fn new(config: CrawlConfig, fetchers: M, store: Arc<dyn ResultStore>) -> Self {
        Self {
            config,
            fetchers,
            store,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        self.store.clone()
    }

    /// Spawns one session for `command` with its own fetcher.
    pub fn spawn_session(&self, command: CrawlCommand) -> JoinHandle<Result<SessionReport, StoreError>> {
        let store = self.store.clone();
        let fetcher = self.fetchers.make();
        let options = SessionOptions::from(&self.config);

        tokio::spawn(async move {
            let session_id = command.session_id.clone();
            let result = run_session(store, fetcher, command, options).await;
            if let Err(ref e) = result {
                error!("Session {} could not be completed: {}", session_id, e);
            }
            result
        })
    }

    /// Consumes commands until the bus closes, starting a session for each.
    pub fn run(self: Arc<Self>, mut commands: Subscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Crawl service waiting for commands");
            while let Some(command) = commands.next().await {
                debug!("Received crawl command {}", command);
                self.spawn_session(command);
            }
            info!("Command bus closed, crawl service stopping");
        })
    }

    /// Periodically deletes expired result streams.
    pub fn spawn_purger(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let period = self.config.purge_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.purge_expired()).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => info!("Purged {} expired result streams", removed),
                    Ok(Err(e)) => error!("Result stream purge failed: {}", e),
                    Err(e) => error!("Result stream purge task failed: {}", e),
                }
            }
        })
    }
}
