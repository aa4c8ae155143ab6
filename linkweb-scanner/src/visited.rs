use std::collections::HashSet;
use std::sync::Mutex;

/// Session-scoped set of URLs that have already been claimed for fetching.
#[derive(Debug, Default)]
pub struct VisitedGuard {
    seen: Mutex<HashSet<String>>,
}

impl VisitedGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `url` as visited and reports whether it already was.
    ///
    /// The caller that gets `false` owns the fetch of that URL; every other
    /// caller, concurrent or later, gets `true` and must skip it.
    pub fn flip(&self, url: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        !seen.insert(url.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
