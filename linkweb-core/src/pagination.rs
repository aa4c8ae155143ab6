use crate::data::{ResultStore, Result};
use crate::model::{SessionId, StreamRecord};
use linkweb_scanner::EdgeRecord;
use serde::Serialize;

/// Position of the next unread record in a session's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub session_id: SessionId,
    pub start_index: usize,
}

impl Cursor {
    pub fn new(session_id: SessionId, start_index: usize) -> Self {
        Self {
            session_id,
            start_index,
        }
    }

    pub fn start(session_id: SessionId) -> Self {
        Self::new(session_id, 0)
    }

    /// Renders the cursor as the results URL served by `host`.
    pub fn href(&self, host: &str) -> String {
        format!(
            "http://{}/crawl/{}?startIndex={}",
            host, self.session_id, self.start_index
        )
    }
}

/// One poll's worth of edges. `next` is `None` once the stream has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub edges: Vec<EdgeRecord>,
    pub next: Option<Cursor>,
}

impl Page {
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }
}

/// Reads everything after `cursor` and works out where the next poll starts.
///
/// Nothing new yields an empty page that points back at the same cursor. A
/// batch ending in the completion record is returned without it and with no
/// next cursor.
pub fn read_page<S: ResultStore + ?Sized>(store: &S, cursor: &Cursor) -> Result<Page> {
    let records = store.read_range(&cursor.session_id, cursor.start_index)?;
    if records.is_empty() {
        return Ok(Page {
            edges: Vec::new(),
            next: Some(cursor.clone()),
        });
    }

    let mut edges = Vec::with_capacity(records.len());
    let mut finished = false;
    for record in records {
        match record {
            StreamRecord::Edge(edge) => edges.push(edge),
            StreamRecord::Done { .. } => {
                finished = true;
                break;
            }
        }
    }

    let next = if finished {
        None
    } else {
        Some(Cursor::new(
            cursor.session_id.clone(),
            cursor.start_index + edges.len(),
        ))
    };

    Ok(Page { edges, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryResultStore;
    use std::time::Duration;

    fn edge(parent: &str) -> StreamRecord {
        EdgeRecord::new(parent.to_string(), vec![], Duration::ZERO, 1).into()
    }

    #[test]
    fn test_href_points_at_next_index() {
        let cursor = Cursor::new(SessionId::parse("123").unwrap(), 4);
        assert_eq!(
            cursor.href("localhost:8080"),
            "http://localhost:8080/crawl/123?startIndex=4"
        );
    }

    #[test]
    fn test_empty_stream_repeats_cursor() {
        let store = MemoryResultStore::new();
        let cursor = Cursor::new(SessionId::parse("s1").unwrap(), 0);

        let page = read_page(&store, &cursor).unwrap();
        assert!(page.edges.is_empty());
        assert_eq!(page.next, Some(cursor));
    }

    #[test]
    fn test_partial_stream_advances_cursor() {
        let store = MemoryResultStore::new();
        let session = SessionId::parse("s2").unwrap();
        store.append(&session, &edge("http://a.com")).unwrap();
        store.append(&session, &edge("http://b.com")).unwrap();

        let page = read_page(&store, &Cursor::start(session.clone())).unwrap();
        assert_eq!(page.edges.len(), 2);
        assert_eq!(page.next, Some(Cursor::new(session, 2)));
    }

    #[test]
    fn test_sentinel_is_stripped_and_ends_paging() {
        let store = MemoryResultStore::new();
        let session = SessionId::parse("s3").unwrap();
        store.append(&session, &edge("http://a.com")).unwrap();
        store.append(&session, &StreamRecord::done()).unwrap();

        let page = read_page(&store, &Cursor::start(session.clone())).unwrap();
        assert_eq!(page.edges.len(), 1);
        assert!(page.is_terminal());

        // Starting exactly at the sentinel still reports the end
        let tail = read_page(&store, &Cursor::new(session, 1)).unwrap();
        assert!(tail.edges.is_empty());
        assert!(tail.is_terminal());
    }
}
