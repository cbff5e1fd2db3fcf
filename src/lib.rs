//! Batch toolkit for NHANES survey files.
//!
//! Three stages share nothing but the filesystem:
//!
//! - [`fetch`] downloads listed archive files into `{year}/{category}/`.
//! - [`convert`] turns SAS transport tables into a mirrored CSV tree.
//! - [`analyse`] inventories the CSVs, merges same-signature tables and
//!   classifies every file into a category bucket.

pub mod analyse;
pub mod category;
pub mod commands;
pub mod config;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod streaming;
pub mod xport;
