use chrono::Utc;
use linkweb_scanner::EdgeRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Text carried by the completion record.
pub const DONE_MESSAGE: &str = "true";

static LAST_SESSION_NANOS: AtomicI64 = AtomicI64::new(0);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("command is missing the ',<sessionID>' suffix: {0:?}")]
    MissingSeparator(String),

    #[error("command has an empty URL")]
    EmptyUrl,

    #[error("invalid session id {0:?}")]
    InvalidSessionId(String),
}

/// Identifier of one crawl session and its result stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Issues a fresh id from the wall clock in nanoseconds, strictly greater
    /// than any id issued before it in this process.
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let issued = LAST_SESSION_NANOS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .map(|last| now.max(last.saturating_add(1)))
            .unwrap_or(now);
        SessionId(issued.to_string())
    }

    /// Validates an id received from outside. Ids travel inside URL paths and
    /// comma-delimited commands, so they may not contain `/`, `,`, `?`, `#` or whitespace.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let invalid = raw.is_empty()
            || raw
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | ',' | '?' | '#'));
        if invalid {
            return Err(CommandError::InvalidSessionId(raw.to_string()));
        }
        Ok(SessionId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to crawl `url`, publishing into the stream of `session_id`.
///
/// On the bus it travels as `"<url>,<sessionID>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCommand {
    pub url: String,
    pub session_id: SessionId,
}

impl CrawlCommand {
    pub fn new(url: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            url: url.into(),
            session_id,
        }
    }
}

impl fmt::Display for CrawlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.url, self.session_id)
    }
}

impl FromStr for CrawlCommand {
    type Err = CommandError;

    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        // Split on the last comma: URLs may contain commas, session ids may not
        let (url, id) = payload
            .rsplit_once(',')
            .ok_or_else(|| CommandError::MissingSeparator(payload.to_string()))?;

        let url = url.trim();
        if url.is_empty() {
            return Err(CommandError::EmptyUrl);
        }

        Ok(CrawlCommand::new(url, SessionId::parse(id.trim())?))
    }
}

/// One element of a session's result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamRecord {
    Edge(EdgeRecord),
    Done {
        #[serde(rename = "doneMessage")]
        done_message: String,
    },
}

impl StreamRecord {
    pub fn done() -> Self {
        StreamRecord::Done {
            done_message: DONE_MESSAGE.to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamRecord::Done { .. })
    }

    pub fn as_edge(&self) -> Option<&EdgeRecord> {
        match self {
            StreamRecord::Edge(edge) => Some(edge),
            StreamRecord::Done { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamRecord::Edge(_) => "edge",
            StreamRecord::Done { .. } => "done",
        }
    }
}

impl From<EdgeRecord> for StreamRecord {
    fn from(edge: EdgeRecord) -> Self {
        StreamRecord::Edge(edge)
    }
}
