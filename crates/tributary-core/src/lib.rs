//! Sync orchestration core.
//!
//! Tributary mirrors external sources (GitHub installations, crawled sites)
//! into a local document store. This crate holds the orchestration: paginated
//! enumeration, bounded fan-out over repositories and items, debounced
//! incremental updates, garbage collection against upstream existence, and a
//! bounded breadth-first web crawler with URL hierarchy decomposition.

pub mod config;
pub mod crawler;
pub mod debounce;
pub mod error;
pub mod fanout;
pub mod gc;
pub mod lifecycle;
pub mod pagination;
pub mod progress;
pub mod source;
pub mod sources;

pub use config::TributaryConfig;
pub use crawler::{CrawlConfig, CrawlReport, CrawlScheduler, HttpTransport, PageTransport};
pub use debounce::{debounce_loop, DebounceStats};
pub use error::SourceError;
pub use fanout::{SyncConcurrency, SyncOrchestrator, SyncReport};
pub use gc::GcReport;
pub use lifecycle::ConnectorManager;
pub use pagination::{collect_all, for_each_page, Cursor, Page};
pub use source::{DocumentSink, ItemRef, RepoRef, SourceClient, SyncTarget, SyncUnitKind};
