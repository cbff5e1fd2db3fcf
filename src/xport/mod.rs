//! SAS transport (XPORT v5/v6) reader.
//!
//! The format is a sequence of 80-byte card images: a library header, one
//! member header block per dataset describing its variables, then the
//! observations packed back to back. Numbers are IBM System/360 hexadecimal
//! floats. Only the first member of a library is read.

mod header;
mod ibm;
mod reader;

#[cfg(test)]
pub(crate) mod fixture;

use std::path::Path;

use thiserror::Error;

use crate::error::AppError;

pub use header::{Column, ColumnKind};
pub use ibm::{format_number, ibm_to_f64};
pub use reader::XptReader;

/// Size of one card image.
pub const RECORD_LEN: usize = 80;

/// Errors raised while decoding a transport file.
#[derive(Debug, Error)]
pub enum XptError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a SAS transport file: {0}")]
    NotTransport(String),

    #[error("SAS transport version 8/9 files are not supported")]
    UnsupportedVersion,

    #[error("malformed header: {0}")]
    Header(String),

    #[error("observation data ends in the middle of a row")]
    Truncated,
}

impl XptError {
    /// Attaches the file path, mapping decode failures to `CorruptInput`.
    pub fn at(self, path: &Path) -> AppError {
        match self {
            XptError::Io(e) => AppError::fs(path, e),
            other => AppError::corrupt(path, other),
        }
    }
}

/// One decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    /// SAS missing numeric (`.`, `._`, `.A` through `.Z`).
    Missing,
}

impl Value {
    /// Renders the cell as a CSV field.
    pub fn to_field(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Missing => String::new(),
        }
    }
}
