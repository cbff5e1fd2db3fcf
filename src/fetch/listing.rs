//! Listing files and source records.
//!
//! A listing is a plain text file with one URL per line, one file per
//! category. Listings are produced by discovery from the survey's listing
//! pages and consumed by the fetcher.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::category::Category;
use crate::error::AppError;
use crate::storage::write_atomic;

/// Year partition for URLs that carry no recognizable cycle.
pub const OTHER_YEAR: &str = "Other";

// ─────────────────────────────────────────────────────────────────────────────
// SourceRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One remote file to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub url: Url,
    pub category: Category,
    pub year: String,
    pub file_name: String,
}

impl SourceRecord {
    /// Builds a record from a file URL, deriving year and file name.
    ///
    /// Returns `None` when the URL path has no file name.
    pub fn from_url(url: Url, category: Category) -> Option<Self> {
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())?
            .to_string();
        let year = infer_year(&url);

        Some(Self {
            url,
            category,
            year,
            file_name,
        })
    }

    /// Local path: `root/{year}/{category}/{file_name}`.
    pub fn destination(&self, root: &Path) -> PathBuf {
        root.join(&self.year)
            .join(self.category.as_str())
            .join(&self.file_name)
    }
}

fn cycle_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d{4}-\d{4})/").expect("static regex is valid"))
}

fn single_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d{4})/").expect("static regex is valid"))
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']([^"'#?]+\.xpt)["']"#).expect("static regex is valid")
    })
}

/// Survey cycle from a URL path: `NNNN-NNNN`, else `NNNN`, else `Other`.
pub fn infer_year(url: &Url) -> String {
    let path = url.path();
    cycle_regex()
        .captures(path)
        .or_else(|| single_year_regex().captures(path))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| OTHER_YEAR.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Listing pages
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts `.xpt` links from a listing page, resolved against `base`.
///
/// Duplicates are removed keeping first-seen order.
pub fn extract_xpt_links(html: &str, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for caps in href_regex().captures_iter(html) {
        let Some(href) = caps.get(1) else { continue };
        match base.join(href.as_str().trim()) {
            Ok(url) => {
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
            Err(e) => warn!(href = href.as_str(), error = %e, "Skipping unresolvable link"),
        }
    }

    links
}

// ─────────────────────────────────────────────────────────────────────────────
// Listing files
// ─────────────────────────────────────────────────────────────────────────────

/// Listing file for `category` under `dir`.
pub fn listing_path(dir: &Path, category: Category) -> PathBuf {
    dir.join(format!("{}.txt", category.as_str()))
}

/// Parses URL lines, skipping blanks and `#` comments.
fn parse_url_lines(text: &str, origin: &Path) -> Vec<Url> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match Url::parse(line) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(file = %origin.display(), line, error = %e, "Skipping invalid URL");
                None
            }
        })
        .collect()
}

/// Reads the listing for `category`.
///
/// # Errors
///
/// Returns `AppError::Configuration` if the listing file is missing.
pub fn read_listing(dir: &Path, category: Category) -> Result<Vec<SourceRecord>, AppError> {
    let path = listing_path(dir, category);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        AppError::Configuration(format!(
            "Cannot read listing for {} at {}: {}",
            category,
            path.display(),
            e
        ))
    })?;

    Ok(parse_url_lines(&text, &path)
        .into_iter()
        .filter_map(|url| {
            let record = SourceRecord::from_url(url.clone(), category);
            if record.is_none() {
                warn!(url = %url, "Skipping URL without a file name");
            }
            record
        })
        .collect())
}

/// Replaces the listing file at `path` with `urls`.
pub fn write_url_list(path: &Path, urls: &[Url]) -> Result<(), AppError> {
    let mut body = String::new();
    for url in urls {
        body.push_str(url.as_str());
        body.push('\n');
    }
    write_atomic(path, body.as_bytes())
}

/// Reads the index of listing-page URLs.
///
/// # Errors
///
/// Returns `AppError::Configuration` if the index cannot be read.
pub fn read_index(path: &Path) -> Result<Vec<Url>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::Configuration(format!("Cannot read index {}: {}", path.display(), e))
    })?;
    Ok(parse_url_lines(&text, path))
}
