//! Remote retrieval: listing discovery and file download.

mod client;
mod discover;
mod fetcher;
pub mod listing;
mod retry;

pub use client::{is_transient_status, HttpSource, RemoteSource, SourceFuture};
pub use discover::{update_listings, ListingReport};
pub use fetcher::{CategoryReport, FetchOutcome, FetchReport, Fetcher};
pub use listing::SourceRecord;
pub use retry::{retry_transient, RetryOutcome};
