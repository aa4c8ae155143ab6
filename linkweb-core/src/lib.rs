pub mod bus;
pub mod config;
pub mod crawl;
pub mod data;
pub mod model;
pub mod pagination;
pub mod service;

pub use bus::{BusError, CommandBus, Subscription};
pub use config::{ConfigError, CrawlConfig};
pub use crawl::{SessionOptions, SessionReport, run_session};
pub use data::{MemoryResultStore, ResultStore, SqliteResultStore, StoreError};
pub use model::{CommandError, CrawlCommand, SessionId, StreamRecord};
pub use pagination::{Cursor, Page, read_page};
pub use service::{CrawlService, FetcherFactory, HttpFetcherFactory};
