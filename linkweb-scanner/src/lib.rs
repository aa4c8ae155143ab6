pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod result;
pub mod visited;

pub use crawler::Crawler;
pub use error::ScanError;
pub use fetcher::{Fetcher, HttpFetcher, build_client};
pub use result::{CrawlSummary, EdgeRecord};
pub use visited::VisitedGuard;
