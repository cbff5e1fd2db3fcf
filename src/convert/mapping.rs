//! Column renaming tables.
//!
//! Mapping files are JSON objects of `original -> replacement` names. A file
//! whose stem names a category (`Dietary.json`) applies to that category's
//! tables only; every other file feeds one global table. Lookups ignore case.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::category::Category;
use crate::error::AppError;

/// Loaded renaming tables.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    by_category: HashMap<Category, HashMap<String, String>>,
    global: HashMap<String, String>,
}

impl ColumnMapping {
    /// Loads every `*.json` file under `dir`, in path order.
    ///
    /// When two files define the same key for the same table, the first one
    /// wins. Empty files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if `dir` is missing or a file is not
    /// a JSON object of strings.
    pub fn load(dir: &Path) -> Result<Self, AppError> {
        if !dir.is_dir() {
            return Err(AppError::Configuration(format!(
                "Mapping directory {} does not exist",
                dir.display()
            )));
        }

        let mut files: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("json"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut mapping = ColumnMapping::default();
        for path in files {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                AppError::Configuration(format!("Cannot read mapping {}: {}", path.display(), e))
            })?;
            if text.trim().is_empty() {
                warn!(path = %path.display(), "Skipping empty mapping file");
                continue;
            }

            let entries: HashMap<String, String> = serde_json::from_str(&text).map_err(|e| {
                AppError::Configuration(format!("Malformed mapping {}: {}", path.display(), e))
            })?;

            let category = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(Category::parse);
            let table = match category {
                Some(category) => mapping.by_category.entry(category).or_default(),
                None => &mut mapping.global,
            };

            let mut sorted: Vec<(String, String)> = entries.into_iter().collect();
            sorted.sort();
            for (key, value) in sorted {
                table.entry(key.to_lowercase()).or_insert(value);
            }
            debug!(path = %path.display(), ?category, "Loaded mapping file");
        }

        info!(
            global = mapping.global.len(),
            categories = mapping.by_category.len(),
            "Column mappings loaded"
        );
        Ok(mapping)
    }

    /// Replacement for `column`, or the column itself when unmapped.
    ///
    /// The category table is consulted before the global one.
    pub fn rename(&self, category: Option<Category>, column: &str) -> String {
        let key = column.to_lowercase();
        category
            .and_then(|c| self.by_category.get(&c))
            .and_then(|table| table.get(&key))
            .or_else(|| self.global.get(&key))
            .cloned()
            .unwrap_or_else(|| column.to_string())
    }

    /// Renames a whole header.
    pub fn rename_all(&self, category: Option<Category>, columns: &[String]) -> Vec<String> {
        columns.iter().map(|c| self.rename(category, c)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_category.values().all(HashMap::is_empty)
    }
}
