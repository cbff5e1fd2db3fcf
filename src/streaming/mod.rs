//! Streaming CSV utilities.
//!
//! Atomic CSV output shared by the converter and the merger, and the
//! record-aware merge of same-signature tables.

mod atomic_writer;
mod csv_merger;

pub use atomic_writer::AtomicCsvWriter;
pub use csv_merger::{merge_csv_files, normalize_header, read_csv_header, MergeSummary};
