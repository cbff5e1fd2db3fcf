//! Builds small transport files for tests.

use std::path::Path;

use super::header::{
    DESCRIPTOR_HEADER, LIBRARY_HEADER, MEMBER_HEADER, NAMESTR_HEADER, OBS_HEADER,
};
use super::RECORD_LEN;

const NAMESTR_LEN: usize = 140;

/// A cell value in a fixture row.
#[derive(Debug, Clone)]
pub(crate) enum Cell {
    Num(f64),
    Text(String),
    Missing,
}

struct FixtureColumn {
    name: String,
    numeric: bool,
    length: usize,
}

/// Fluent builder for a single-member transport file.
pub(crate) struct XptFixture {
    dataset: String,
    columns: Vec<FixtureColumn>,
    rows: Vec<Vec<Cell>>,
}

impl XptFixture {
    pub fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Adds an 8-byte numeric column.
    pub fn numeric(mut self, name: &str) -> Self {
        self.columns.push(FixtureColumn {
            name: name.to_string(),
            numeric: true,
            length: 8,
        });
        self
    }

    pub fn character(mut self, name: &str, length: usize) -> Self {
        self.columns.push(FixtureColumn {
            name: name.to_string(),
            numeric: false,
            length,
        });
        self
    }

    pub fn row(mut self, cells: Vec<Cell>) -> Self {
        assert_eq!(cells.len(), self.columns.len(), "row width must match columns");
        self.rows.push(cells);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        push_record(&mut out, &header_record(LIBRARY_HEADER, "000000000000000000000000000000  "));
        push_record(&mut out, &descriptor_record("SASLIB"));
        push_record(&mut out, &padded(b"16OCT26:10:00:00", RECORD_LEN));
        push_record(&mut out, &header_record(MEMBER_HEADER, "000000000000000001600000000140  "));
        push_record(&mut out, &header_record(DESCRIPTOR_HEADER, "000000000000000000000000000000  "));
        push_record(&mut out, &descriptor_record(&self.dataset));

        let mut label_record = padded(b"16OCT26:10:00:00", RECORD_LEN);
        label_record[32..72].copy_from_slice(&padded(self.dataset.as_bytes(), 40));
        push_record(&mut out, &label_record);

        let count = format!("000000{:04}00000000000000000000  ", self.columns.len());
        push_record(&mut out, &header_record(NAMESTR_HEADER, &count));

        let mut namestrs = Vec::new();
        let mut position = 0usize;
        for (index, column) in self.columns.iter().enumerate() {
            namestrs.extend_from_slice(&namestr(column, index, position));
            position += column.length;
        }
        pad_to_record(&mut namestrs, 0);
        out.extend_from_slice(&namestrs);

        push_record(&mut out, &header_record(OBS_HEADER, "000000000000000000000000000000  "));

        let mut data = Vec::new();
        for row in &self.rows {
            for (cell, column) in row.iter().zip(&self.columns) {
                data.extend_from_slice(&encode_cell(cell, column));
            }
        }
        pad_to_record(&mut data, b' ');
        out.extend_from_slice(&data);

        out
    }

    pub fn write_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("fixture directory");
        }
        std::fs::write(path, self.to_bytes()).expect("fixture write");
    }
}

/// Encodes `value` as an 8-byte IBM hexadecimal float.
pub(crate) fn f64_to_ibm(value: f64) -> [u8; 8] {
    if value == 0.0 {
        return [0; 8];
    }
    let sign: u8 = if value < 0.0 { 0x80 } else { 0 };
    let mut fraction = value.abs();
    let mut exponent: i32 = 0;
    while fraction >= 1.0 {
        fraction /= 16.0;
        exponent += 1;
    }
    while fraction < 1.0 / 16.0 {
        fraction *= 16.0;
        exponent -= 1;
    }

    let mut mantissa = (fraction * 2f64.powi(56)).round() as u64;
    if mantissa >= 1 << 56 {
        mantissa >>= 4;
        exponent += 1;
    }

    let mut bytes = mantissa.to_be_bytes();
    bytes[0] = sign | (exponent + 64) as u8;
    bytes
}

fn encode_cell(cell: &Cell, column: &FixtureColumn) -> Vec<u8> {
    match (cell, column.numeric) {
        (Cell::Num(n), true) => f64_to_ibm(*n)[..column.length].to_vec(),
        (Cell::Missing, true) => {
            let mut bytes = vec![0u8; column.length];
            bytes[0] = b'.';
            bytes
        }
        (Cell::Text(s), false) => padded(s.as_bytes(), column.length),
        (Cell::Missing, false) => vec![b' '; column.length],
        _ => panic!("cell {:?} does not fit column {}", cell, column.name),
    }
}

fn namestr(column: &FixtureColumn, index: usize, position: usize) -> Vec<u8> {
    let mut raw = vec![0u8; NAMESTR_LEN];
    let ntype: i16 = if column.numeric { 1 } else { 2 };
    raw[0..2].copy_from_slice(&ntype.to_be_bytes());
    raw[4..6].copy_from_slice(&(column.length as i16).to_be_bytes());
    raw[6..8].copy_from_slice(&(index as i16 + 1).to_be_bytes());
    raw[8..16].copy_from_slice(&padded(column.name.as_bytes(), 8));
    raw[16..56].copy_from_slice(&padded(column.name.as_bytes(), 40));
    raw[56..64].copy_from_slice(&padded(b"", 8));
    raw[84..88].copy_from_slice(&(position as i32).to_be_bytes());
    raw
}

fn header_record(prefix: &[u8], tail: &str) -> Vec<u8> {
    let mut record = prefix.to_vec();
    record.extend_from_slice(tail.as_bytes());
    padded(&record, RECORD_LEN)
}

fn descriptor_record(name: &str) -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(&padded(b"SAS", 8));
    record.extend_from_slice(&padded(name.as_bytes(), 8));
    record.extend_from_slice(&padded(b"SASDATA", 8));
    record.extend_from_slice(&padded(b"9.4", 8));
    record.extend_from_slice(&padded(b"X64_10PR", 8));
    record.extend_from_slice(&padded(b"", 24));
    record.extend_from_slice(&padded(b"16OCT26:10:00:00", 16));
    record
}

fn padded(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = bytes[..bytes.len().min(len)].to_vec();
    out.resize(len, b' ');
    out
}

fn pad_to_record(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % RECORD_LEN;
    if rem != 0 {
        bytes.resize(bytes.len() + RECORD_LEN - rem, fill);
    }
}

fn push_record(out: &mut Vec<u8>, record: &[u8]) {
    assert_eq!(record.len(), RECORD_LEN);
    out.extend_from_slice(record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xport::ibm_to_f64;

    #[test]
    fn ibm_encoding_round_trips_representative_values() {
        for value in [1.0, -118.625, 0.5, 73557.0, 1e-3, 123456789.25, -2.0e10] {
            assert_eq!(ibm_to_f64(&f64_to_ibm(value)), Some(value), "value {}", value);
        }
    }
}
