//! Streaming merge of CSV files that share a column set.
//!
//! Key features:
//! - Rows are streamed record by record, never whole files
//! - Header normalization with BOM stripping
//! - Per-member column re-ordering onto the first member's header
//! - Atomic output with periodic flushes

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder};
use serde::Serialize;
use tracing::debug;

use crate::config::ColumnOrderPolicy;
use crate::error::AppError;

use super::AtomicCsvWriter;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Buffer size for reading (64 KB).
const BUFFER_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Header of the merged output (the first member's order).
    pub columns: Vec<String>,
    /// Data rows contributed by each member, in merge order.
    pub member_rows: Vec<(PathBuf, u64)>,
    /// Total data rows written.
    pub rows: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Header helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Reads only the header record of a CSV file.
///
/// # Errors
///
/// `Filesystem` if the file cannot be opened, `CorruptInput` if it is empty
/// or the first record cannot be parsed.
pub fn read_csv_header(path: &Path) -> Result<Vec<String>, AppError> {
    let file = File::open(path).map_err(|e| AppError::fs(path, e))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::with_capacity(BUFFER_SIZE, file));

    let header = reader
        .byte_headers()
        .map_err(|e| AppError::corrupt(path, format!("cannot read header: {}", e)))?;
    let columns = normalize_header(header);
    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err(AppError::corrupt(path, "file has no header"));
    }
    Ok(columns)
}

/// Header fields as strings, with a leading UTF-8 BOM removed.
pub fn normalize_header(header: &ByteRecord) -> Vec<String> {
    header
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let field = if i == 0 && field.starts_with(UTF8_BOM) {
                &field[UTF8_BOM.len()..]
            } else {
                field
            };
            String::from_utf8_lossy(field).into_owned()
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

/// Concatenates the data rows of `members` into `output`.
///
/// The first member's header becomes the output header. Under
/// [`ColumnOrderPolicy::Ignore`] the fields of later members are re-ordered
/// to that header; under [`ColumnOrderPolicy::Respect`] their headers must
/// match exactly. The output is flushed every `flush_every` rows and only
/// replaces `output` once every member has been copied.
///
/// # Errors
///
/// Returns `CorruptInput` if a member's columns do not line up with the first
/// member's or a row cannot be parsed, and `Filesystem` for I/O failures. The
/// destination is left untouched on error.
pub fn merge_csv_files(
    members: &[PathBuf],
    output: &Path,
    policy: ColumnOrderPolicy,
    flush_every: usize,
) -> Result<MergeSummary, AppError> {
    let flush_every = flush_every.max(1);
    let mut writer = AtomicCsvWriter::new(output)?;
    let mut canonical: Option<Vec<String>> = None;
    let mut member_rows = Vec::with_capacity(members.len());

    for member in members {
        let file = File::open(member).map_err(|e| AppError::fs(member, e))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::with_capacity(BUFFER_SIZE, file));

        let header = normalize_header(
            reader
                .byte_headers()
                .map_err(|e| AppError::corrupt(member, format!("cannot read header: {}", e)))?,
        );
        if header.is_empty() {
            return Err(AppError::corrupt(member, "file has no header"));
        }

        let order = match &canonical {
            Some(canonical) => column_order(canonical, &header, policy)
                .map_err(|message| AppError::corrupt(member, message))?,
            None => None,
        };
        if canonical.is_none() {
            writer.write_header(&header)?;
            canonical = Some(header);
        }

        let before = writer.rows_written();
        let mut record = ByteRecord::new();
        loop {
            let more = reader
                .read_byte_record(&mut record)
                .map_err(|e| AppError::corrupt(member, format!("cannot read row: {}", e)))?;
            if !more {
                break;
            }
            match &order {
                Some(order) => {
                    let reordered: ByteRecord = order.iter().map(|&i| &record[i]).collect();
                    writer.write_byte_record(&reordered)?;
                }
                None => writer.write_byte_record(&record)?,
            }
            if writer.rows_written() % flush_every as u64 == 0 {
                writer.flush()?;
            }
        }

        let rows = writer.rows_written() - before;
        debug!(member = %member.display(), rows, "Merged member");
        member_rows.push((member.clone(), rows));
    }

    let columns = canonical
        .ok_or_else(|| AppError::Internal("merge called without members".to_string()))?;
    let rows = writer.finish()?;
    Ok(MergeSummary {
        columns,
        member_rows,
        rows,
    })
}

/// Positions in `header` of each `canonical` column, or `None` when the
/// member is already in canonical order.
fn column_order(
    canonical: &[String],
    header: &[String],
    policy: ColumnOrderPolicy,
) -> Result<Option<Vec<usize>>, String> {
    if canonical == header {
        return Ok(None);
    }
    let mismatch = || {
        format!(
            "columns {:?} do not match merge header {:?}",
            header, canonical
        )
    };
    match policy {
        ColumnOrderPolicy::Respect => Err(mismatch()),
        ColumnOrderPolicy::Ignore => {
            if header.len() != canonical.len() {
                return Err(mismatch());
            }
            canonical
                .iter()
                .map(|name| header.iter().position(|h| h == name).ok_or_else(mismatch))
                .collect::<Result<Vec<usize>, String>>()
                .map(Some)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
