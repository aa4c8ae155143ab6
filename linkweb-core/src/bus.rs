use crate::model::{CrawlCommand, SessionId};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Commands buffered per subscriber before the slowest one starts losing them.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BusError {
    #[error("no crawl worker is subscribed to the command bus")]
    NoSubscribers,

    #[error("crawl URL is empty")]
    EmptyUrl,
}

/// In-process publish/subscribe channel carrying `"<url>,<sessionID>"` commands.
///
/// Delivery is at most once: a subscriber that falls too far behind skips
/// the commands it missed.
#[derive(Debug, Clone)]
pub struct CommandBus {
    sender: broadcast::Sender<String>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl CommandBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publishes a raw command payload and returns how many subscribers got it.
    pub fn publish_raw(&self, payload: impl Into<String>) -> Result<usize, BusError> {
        self.sender
            .send(payload.into())
            .map_err(|_| BusError::NoSubscribers)
    }

    pub fn publish(&self, command: &CrawlCommand) -> Result<usize, BusError> {
        self.publish_raw(command.to_string())
    }

    /// Allocates a session for `url` and publishes the crawl command for it.
    pub fn submit(&self, url: &str) -> Result<SessionId, BusError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(BusError::EmptyUrl);
        }

        let session_id = SessionId::generate();
        self.publish(&CrawlCommand::new(url, session_id.clone()))?;
        Ok(session_id)
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<String>,
}

impl Subscription {
    /// Waits for the next well-formed command. Malformed payloads and lag are
    /// logged and skipped. Returns `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<CrawlCommand> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => match payload.parse::<CrawlCommand>() {
                    Ok(command) => return Some(command),
                    Err(e) => warn!("Ignoring malformed crawl command: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Command subscriber lagged, {} crawl commands lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
