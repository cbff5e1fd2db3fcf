//! Card-image header parsing.

use std::io::Read;

use super::{XptError, RECORD_LEN};

pub(crate) const LIBRARY_HEADER: &[u8] = b"HEADER RECORD*******LIBRARY HEADER RECORD!!!!!!!";
pub(crate) const LIBRARY_HEADER_V8: &[u8] = b"HEADER RECORD*******LIBV8   HEADER RECORD!!!!!!!";
pub(crate) const MEMBER_HEADER: &[u8] = b"HEADER RECORD*******MEMBER  HEADER RECORD!!!!!!!";
pub(crate) const MEMBER_HEADER_V8: &[u8] = b"HEADER RECORD*******MEMBV8  HEADER RECORD!!!!!!!";
pub(crate) const DESCRIPTOR_HEADER: &[u8] = b"HEADER RECORD*******DSCRPTR HEADER RECORD!!!!!!!";
pub(crate) const NAMESTR_HEADER: &[u8] = b"HEADER RECORD*******NAMESTR HEADER RECORD!!!!!!!";
pub(crate) const OBS_HEADER: &[u8] = b"HEADER RECORD*******OBS     HEADER RECORD!!!!!!!";

pub(crate) type Record = [u8; RECORD_LEN];

/// Storage type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Character,
}

/// A variable descriptor (namestr).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub label: String,
    pub format: String,
    pub kind: ColumnKind,
    /// Stored width in bytes.
    pub length: usize,
    /// Byte offset within an observation.
    pub position: usize,
}

/// Dataset-level information from the member header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MemberInfo {
    pub name: String,
    pub label: String,
    pub columns: Vec<Column>,
}

impl MemberInfo {
    /// Bytes per observation.
    pub fn row_len(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.position + c.length)
            .max()
            .unwrap_or(0)
    }
}

/// Reads one full card image; `None` at a clean end of input.
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<Option<Record>, XptError> {
    let mut record = [0u8; RECORD_LEN];
    let filled = read_up_to(reader, &mut record)?;
    match filled {
        0 => Ok(None),
        RECORD_LEN => Ok(Some(record)),
        n => Err(XptError::Header(format!(
            "header card is {} bytes, expected {}",
            n, RECORD_LEN
        ))),
    }
}

/// Fills `buf` as far as the input allows, returning the byte count.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, XptError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(XptError::Io(e)),
        }
    }
    Ok(filled)
}

fn require_record<R: Read>(reader: &mut R, what: &str) -> Result<Record, XptError> {
    read_record(reader)?.ok_or_else(|| XptError::Header(format!("file ends before {}", what)))
}

fn expect_header(record: &Record, prefix: &[u8], what: &str) -> Result<(), XptError> {
    if record.starts_with(prefix) {
        Ok(())
    } else {
        Err(XptError::Header(format!("expected {} header record", what)))
    }
}

/// Parses the library and first member header, leaving `reader` positioned at
/// the first observation.
pub(crate) fn read_member_info<R: Read>(reader: &mut R) -> Result<MemberInfo, XptError> {
    let library = read_record(reader)?
        .ok_or_else(|| XptError::NotTransport("file is empty".to_string()))?;
    if library.starts_with(LIBRARY_HEADER_V8) {
        return Err(XptError::UnsupportedVersion);
    }
    if !library.starts_with(LIBRARY_HEADER) {
        return Err(XptError::NotTransport(
            "missing library header record".to_string(),
        ));
    }

    let first = require_record(reader, "library descriptor")?;
    if &first[..8] != b"SAS     " {
        return Err(XptError::NotTransport(
            "library descriptor does not start with SAS".to_string(),
        ));
    }
    require_record(reader, "library modification date")?;

    let member = require_record(reader, "member header")?;
    if member.starts_with(MEMBER_HEADER_V8) {
        return Err(XptError::UnsupportedVersion);
    }
    expect_header(&member, MEMBER_HEADER, "member")?;
    let namestr_len = parse_decimal(&member[74..78], "namestr length")?;
    if namestr_len != 140 && namestr_len != 136 {
        return Err(XptError::Header(format!(
            "unsupported namestr length {}",
            namestr_len
        )));
    }

    let descriptor = require_record(reader, "descriptor header")?;
    expect_header(&descriptor, DESCRIPTOR_HEADER, "descriptor")?;

    let dataset = require_record(reader, "dataset descriptor")?;
    let name = text(&dataset[8..16]);
    let dataset_extra = require_record(reader, "dataset label")?;
    let label = text(&dataset_extra[32..72]);

    let namestr_header = require_record(reader, "namestr header")?;
    expect_header(&namestr_header, NAMESTR_HEADER, "namestr")?;
    let var_count = parse_decimal(&namestr_header[54..58], "variable count")?;

    let namestr_bytes = var_count * namestr_len;
    let padded = namestr_bytes.div_ceil(RECORD_LEN) * RECORD_LEN;
    let mut block = vec![0u8; padded];
    if read_up_to(reader, &mut block)? != padded {
        return Err(XptError::Header("variable descriptors are truncated".to_string()));
    }

    let columns = block[..namestr_bytes]
        .chunks_exact(namestr_len)
        .map(parse_namestr)
        .collect::<Result<Vec<_>, _>>()?;

    let obs = require_record(reader, "observation header")?;
    expect_header(&obs, OBS_HEADER, "observation")?;

    Ok(MemberInfo {
        name,
        label,
        columns,
    })
}

fn parse_namestr(raw: &[u8]) -> Result<Column, XptError> {
    let kind = match i16::from_be_bytes([raw[0], raw[1]]) {
        1 => ColumnKind::Numeric,
        2 => ColumnKind::Character,
        other => {
            return Err(XptError::Header(format!("unknown variable type {}", other)));
        }
    };
    let length = i16::from_be_bytes([raw[4], raw[5]]);
    let name = text(&raw[8..16]);
    let label = text(&raw[16..56]);
    let format = text(&raw[56..64]);
    let position = i32::from_be_bytes([raw[84], raw[85], raw[86], raw[87]]);

    let valid_length = match kind {
        ColumnKind::Numeric => (2..=8).contains(&length),
        ColumnKind::Character => length > 0,
    };
    if !valid_length {
        return Err(XptError::Header(format!(
            "variable {} has invalid length {}",
            name, length
        )));
    }
    if position < 0 {
        return Err(XptError::Header(format!(
            "variable {} has negative position {}",
            name, position
        )));
    }
    if name.is_empty() {
        return Err(XptError::Header("variable with empty name".to_string()));
    }

    Ok(Column {
        name,
        label,
        format,
        kind,
        length: length as usize,
        position: position as usize,
    })
}

fn parse_decimal(raw: &[u8], what: &str) -> Result<usize, XptError> {
    let digits = std::str::from_utf8(raw)
        .map_err(|_| XptError::Header(format!("{} is not ASCII", what)))?;
    digits
        .trim()
        .parse()
        .map_err(|_| XptError::Header(format!("{} '{}' is not a number", what, digits)))
}

/// Decodes a blank-padded text field.
pub(crate) fn text(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let trimmed = &raw[..end];
    match std::str::from_utf8(trimmed) {
        Ok(s) => s.to_string(),
        // Latin-1 fallback: every byte maps to the code point of the same value.
        Err(_) => trimmed.iter().map(|&b| char::from(b)).collect(),
    }
}
