// Shared fixtures for the integration tests

#![allow(dead_code)]

use linkweb_core::data::ResultStore;
use linkweb_core::model::SessionId;
use linkweb_core::pagination::{Cursor, read_page};
use linkweb_scanner::error::{Result, ScanError};
use linkweb_scanner::{EdgeRecord, Fetcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves a fixed link graph and counts how often each page was fetched.
#[derive(Clone)]
pub struct GraphFetcher {
    pages: Arc<HashMap<String, Vec<String>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    delay: Duration,
}

impl GraphFetcher {
    pub fn new(edges: Vec<(&str, Vec<&str>)>) -> Self {
        let pages = edges
            .into_iter()
            .map(|(page, links)| (page.to_string(), links.into_iter().map(String::from).collect()))
            .collect();
        Self {
            pages: Arc::new(pages),
            calls: Arc::new(Mutex::new(HashMap::new())),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Fetcher for GraphFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ScanError::Other(format!("no such page: {}", url)))
    }
}

/// The graph from the end-to-end scenario: example.com -> other.org ->
/// {third.net, example.com}, third.net -> fourth.io.
pub fn scenario_graph() -> GraphFetcher {
    GraphFetcher::new(vec![
        ("http://example.com", vec!["http://other.org"]),
        ("http://other.org", vec!["http://third.net", "http://example.com"]),
        ("http://third.net", vec!["http://fourth.io"]),
    ])
}

/// Follows cursors from index 0 until the stream ends, returning every edge
/// seen and the number of polls it took.
pub async fn poll_until_terminal<S: ResultStore + ?Sized>(
    store: &S,
    session_id: &SessionId,
) -> (Vec<EdgeRecord>, usize) {
    let mut cursor = Cursor::start(session_id.clone());
    let mut edges = Vec::new();
    let mut polls = 0;

    loop {
        polls += 1;
        assert!(polls < 10_000, "stream never terminated");

        let page = read_page(store, &cursor).unwrap();
        edges.extend(page.edges);
        match page.next {
            Some(next) => {
                assert_eq!(next.start_index, edges.len());
                cursor = next;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            None => return (edges, polls),
        }
    }
}
