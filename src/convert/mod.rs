//! XPT to CSV conversion.

mod converter;
pub mod mapping;

pub use converter::{ConvertReport, ConvertedFile, Converter};
pub use mapping::ColumnMapping;
