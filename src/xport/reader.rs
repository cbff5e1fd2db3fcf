//! Streaming observation reader.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::header::{read_member_info, read_up_to, text, Column, ColumnKind, MemberInfo, MEMBER_HEADER};
use super::ibm::ibm_to_f64;
use super::{Value, XptError, RECORD_LEN};

/// Compact the look-ahead buffer once this many bytes have been consumed.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Reads observations from the first member of a transport file.
///
/// Rows are decoded on demand, so memory stays bounded by the chunk size the
/// caller asks for rather than the table size.
pub struct XptReader<R: Read> {
    inner: R,
    member: MemberInfo,
    row_len: usize,
    buf: Vec<u8>,
    pos: usize,
    ended: bool,
}

impl XptReader<BufReader<File>> {
    /// Opens a transport file on disk.
    pub fn open(path: &Path) -> Result<Self, XptError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> XptReader<R> {
    /// Parses the headers from `inner`.
    pub fn new(mut inner: R) -> Result<Self, XptError> {
        let member = read_member_info(&mut inner)?;
        let row_len = member.row_len();

        Ok(Self {
            inner,
            member,
            row_len,
            buf: Vec::new(),
            pos: 0,
            ended: false,
        })
    }

    /// Dataset name from the member header.
    pub fn dataset_name(&self) -> &str {
        &self.member.name
    }

    /// Dataset label from the member header.
    pub fn dataset_label(&self) -> &str {
        &self.member.label
    }

    /// Column names in storage order.
    pub fn column_names(&self) -> Vec<String> {
        self.member.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Decodes the next observation, or `None` at the end of the member.
    pub fn next_row(&mut self) -> Result<Option<Vec<Value>>, XptError> {
        if self.row_len == 0 {
            return Ok(None);
        }

        while self.remaining() < self.row_len && !self.ended {
            self.fill()?;
        }

        if self.remaining() < self.row_len {
            return if self.rest_is_blank() {
                Ok(None)
            } else {
                Err(XptError::Truncated)
            };
        }

        if is_blank(&self.buf[self.pos..self.pos + self.row_len]) {
            // Trailing padding is blank and shorter than one card; look far
            // enough ahead to tell it apart from a genuinely blank row.
            while self.remaining() < RECORD_LEN && !self.ended {
                self.fill()?;
            }
            if self.ended && self.remaining() < RECORD_LEN && self.rest_is_blank() {
                self.pos = self.buf.len();
                return Ok(None);
            }
        }

        let start = self.pos;
        let row = decode_row(&self.member.columns, &self.buf[start..start + self.row_len]);
        self.pos += self.row_len;
        self.compact();
        Ok(Some(row))
    }

    /// Reads up to `max_rows` observations; an empty vector signals the end.
    pub fn read_chunk(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>, XptError> {
        let mut rows = Vec::with_capacity(max_rows.min(4096));
        while rows.len() < max_rows {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Reads every remaining observation.
    pub fn read_all(&mut self) -> Result<Vec<Vec<Value>>, XptError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn rest_is_blank(&self) -> bool {
        is_blank(&self.buf[self.pos..])
    }

    /// Appends the next card to the buffer, detecting the end of the member.
    fn fill(&mut self) -> Result<(), XptError> {
        let mut record = [0u8; RECORD_LEN];
        let n = read_up_to(&mut self.inner, &mut record)?;
        if n == 0 || record[..n].starts_with(MEMBER_HEADER) {
            self.ended = true;
            return Ok(());
        }
        self.buf.extend_from_slice(&record[..n]);
        if n < RECORD_LEN {
            self.ended = true;
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == b' ')
}

fn decode_row(columns: &[Column], raw: &[u8]) -> Vec<Value> {
    columns
        .iter()
        .map(|column| {
            let cell = &raw[column.position..column.position + column.length];
            match column.kind {
                ColumnKind::Numeric => match ibm_to_f64(cell) {
                    Some(n) => Value::Number(n),
                    None => Value::Missing,
                },
                ColumnKind::Character => Value::Text(text(cell)),
            }
        })
        .collect()
}
