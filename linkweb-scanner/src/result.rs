use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One fetched page and the qualifying outbound links found on it.
///
/// `time_found` is measured from the start of the crawl session and travels on
/// the wire as whole nanoseconds under `timeFound`. `depth` is the remaining
/// depth budget at the moment the page was expanded, so it shrinks by one at
/// every hop away from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub parent: String,
    pub children: Vec<String>,
    #[serde(with = "duration_nanos")]
    pub time_found: Duration,
    pub depth: u32,
}

impl EdgeRecord {
    pub fn new(parent: String, children: Vec<String>, time_found: Duration, depth: u32) -> Self {
        Self {
            parent,
            children,
            time_found,
            depth,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Summary counters for one crawl, reported once the root invocation completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Pages fetched successfully (one edge record each).
    pub fetched: usize,
    /// Pages whose fetch failed and were treated as dead ends.
    pub failed: usize,
    /// Invocations pruned because the URL had already been claimed.
    pub skipped: usize,
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_record_wire_names() {
        let edge = EdgeRecord::new(
            "http://example.com".to_string(),
            vec!["http://other.org".to_string()],
            Duration::from_millis(3),
            2,
        );

        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["parent"], "http://example.com");
        assert_eq!(json["children"][0], "http://other.org");
        assert_eq!(json["timeFound"], 3_000_000);
        assert_eq!(json["depth"], 2);
        assert!(json.get("time_found").is_none());
    }

    #[test]
    fn test_edge_record_leaf() {
        let edge = EdgeRecord::new("http://a.com".into(), vec![], Duration::ZERO, 1);
        assert!(edge.is_leaf());
    }
}
