//! Atomic CSV output.
//!
//! Rows go to a temporary file beside the destination, which replaces the
//! destination on `finish()`. Dropping the writer unfinished removes the
//! temporary file, so a crash never leaves a half-written CSV at the final path.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, Writer};
use tempfile::NamedTempFile;

use crate::error::AppError;

/// Buffer size for the underlying file writer (64 KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// CSV writer that publishes its output atomically.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
    rows: u64,
}

impl AtomicCsvWriter {
    /// Creates a writer targeting `final_path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filesystem` if the parent directory cannot be
    /// determined or created, or the temporary file cannot be opened.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| final_path.file_name().map(|_| PathBuf::from(".")))
            .ok_or_else(|| AppError::fs(&final_path, "cannot determine parent directory"))?;

        std::fs::create_dir_all(&parent_dir).map_err(|e| AppError::fs(&parent_dir, e))?;

        let temp_file = NamedTempFile::new_in(&parent_dir)
            .map_err(|e| AppError::fs(&parent_dir, format!("cannot create temporary file: {}", e)))?;

        let writer = Writer::from_writer(BufWriter::with_capacity(BUFFER_SIZE, temp_file));

        Ok(Self {
            writer,
            final_path,
            rows: 0,
        })
    }

    /// Destination the output is published to.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Writes the header row. Not counted as a data row.
    pub fn write_header<I, T>(&mut self, columns: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(columns)
            .map_err(|e| AppError::fs(&self.final_path, format!("cannot write header: {}", e)))
    }

    /// Writes one data row.
    pub fn write_row<I, T>(&mut self, fields: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|e| AppError::fs(&self.final_path, format!("cannot write row: {}", e)))?;
        self.rows += 1;
        Ok(())
    }

    /// Writes one pre-parsed data row.
    pub fn write_byte_record(&mut self, record: &ByteRecord) -> Result<(), AppError> {
        self.writer
            .write_byte_record(record)
            .map_err(|e| AppError::fs(&self.final_path, format!("cannot write row: {}", e)))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered rows to the temporary file.
    pub fn flush(&mut self) -> Result<(), AppError> {
        self.writer
            .flush()
            .map_err(|e| AppError::fs(&self.final_path, format!("cannot flush: {}", e)))
    }

    /// Data rows written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flushes and atomically replaces the destination.
    ///
    /// Returns the number of data rows written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filesystem` if flushing or persisting fails; the
    /// temporary file is removed in that case.
    pub fn finish(self) -> Result<u64, AppError> {
        let final_path = self.final_path;

        let buf_writer = self.writer.into_inner().map_err(|e| {
            AppError::fs(&final_path, format!("cannot flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer.into_inner().map_err(|e| {
            AppError::fs(&final_path, format!("cannot flush buffer: {}", e.error()))
        })?;

        named_temp
            .persist(&final_path)
            .map_err(|e| AppError::fs(&final_path, format!("cannot persist: {}", e.error)))?;

        Ok(self.rows)
    }
}
