use crate::error::{Result, ScanError};
use futures::StreamExt;
use html_escape::decode_html_entities;
use lol_html::{HtmlRewriter, Settings, element};
use reqwest::Client;
use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::debug;
use url::Url;

/// Chunks buffered between the body reader and the tokenizer worker.
const CHUNK_BUFFER: usize = 8;

/// A capability that turns a page URL into its qualifying outbound links.
///
/// The orchestrator only ever talks to this trait, so tests can drive a crawl
/// over a fixed in-memory graph.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Builds the shared HTTP client used by every session's fetcher.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent("linkweb/0.1 (https://github.com/trapdoorsec/linkweb)")
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .pool_idle_timeout(timeout)
        .tcp_keepalive(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;
    Ok(client)
}

/// Fetches pages over HTTP under a fixed cap on concurrent requests.
pub struct HttpFetcher {
    client: Client,
    slots: Arc<Semaphore>,
    max_links: usize,
    in_flight: Arc<InFlight>,
}

impl HttpFetcher {
    pub fn new(client: Client, max_concurrency: usize, max_links: usize) -> Self {
        Self {
            client,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_links,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Counters for requests currently holding a slot.
    pub fn in_flight(&self) -> Arc<InFlight> {
        self.in_flight.clone()
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        // The semaphore is owned here and never closed
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|e| ScanError::Other(e.to_string()))?;
        let _slot = self.in_flight.enter();

        let target =
            Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;

        debug!("Fetching {}", url);
        let response = self.client.get(target).send().await?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHUNK_BUFFER);
        let source = url.to_string();
        let cap = self.max_links;
        let tokenizer = tokio::task::spawn_blocking(move || {
            collect_links(&source, cap, std::iter::from_fn(move || rx.blocking_recv()))
        });

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("Body of {} ended early: {}", url, e);
                    break;
                }
            };
            // A closed channel means the tokenizer reached the link cap
            if tx.send(chunk.to_vec()).await.is_err() {
                break;
            }
        }
        drop(tx);

        let links = tokenizer.await?;
        debug!("{} yielded {} links", url, links.len());
        Ok(links)
    }
}

/// Tracks how many fetches currently hold a semaphore slot, and the peak.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightSlot {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightSlot(self.clone())
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightSlot(Arc<InFlight>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Extracts the second-level label of a URL's host: `example` for
/// `http://www.example.com/path`.
///
/// Only that one label is compared: `example.com`, `example.org` and
/// `blog.example.com` all map to `example`, while `example.co.uk` maps to `co`.
pub fn domain_label(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2].to_string())
}

/// Decides which anchors found on one page are worth following.
#[derive(Debug, Clone)]
pub struct LinkFilter {
    source_label: Option<String>,
}

impl LinkFilter {
    pub fn for_page(source_url: &str) -> Self {
        Self {
            source_label: domain_label(source_url),
        }
    }

    /// Returns the link to record for `href`, or `None` when it does not qualify.
    pub fn accept(&self, href: &str) -> Option<String> {
        let href = href.trim();
        let parsed = Url::parse(href).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        let label = domain_label(href)?;
        if self.source_label.as_deref() == Some(label.as_str()) {
            return None;
        }
        Some(href.to_string())
    }
}

/// Streams `chunks` of HTML through a tokenizer and collects up to `cap`
/// cross-domain anchor targets, stopping as soon as the cap is reached.
///
/// Markup the tokenizer rejects ends the scan quietly with whatever was found.
pub fn collect_links<I, B>(source_url: &str, cap: usize, chunks: I) -> Vec<String>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    if cap == 0 {
        return Vec::new();
    }

    let filter = LinkFilter::for_page(source_url);
    let links = RefCell::new(Vec::new());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("a[href]", |el| {
                let mut links = links.borrow_mut();
                if links.len() >= cap {
                    return Ok(());
                }
                // Attribute values come back raw, with entities still encoded
                if let Some(href) = el.get_attribute("href")
                    && let Some(link) = filter.accept(&decode_html_entities(&href))
                {
                    links.push(link);
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );

    let mut capped = false;
    for chunk in chunks {
        if let Err(e) = rewriter.write(chunk.as_ref()) {
            debug!("Stopped tokenizing {}: {}", source_url, e);
            capped = true;
            break;
        }
        if links.borrow().len() >= cap {
            capped = true;
            break;
        }
    }

    if capped {
        drop(rewriter);
    } else if let Err(e) = rewriter.end() {
        debug!("Stopped tokenizing {}: {}", source_url, e);
    }

    links.into_inner()
}
