//! Category classification by file name, and the classified copy tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::category::{Category, UNCLASSIFIED_BUCKET};
use crate::error::AppError;
use crate::fetch::listing::OTHER_YEAR;
use crate::storage::{part_path, FailureLog, PipelineStage};

use super::grouping::{strip_prefix_ignore_case, PRE_PANDEMIC_PREFIX};
use super::inventory::Inventory;
use super::merge::MergedManifest;

/// Bucket name to member paths.
pub type ClassificationManifest = BTreeMap<String, Vec<String>>;

/// Bucket name to copied destination paths.
pub type ClassifiedManifest = BTreeMap<String, Vec<String>>;

/// NHANES file-name conventions per component.
pub fn default_rules() -> BTreeMap<Category, Vec<String>> {
    let rules: [(Category, &[&str]); 5] = [
        (Category::Demographics, &["DEMO*"]),
        (
            Category::Dietary,
            &["DR1*", "DR2*", "DRX*", "DS1*", "DS2*", "DSQ*", "DSBI*", "DSII*", "DSPI*"],
        ),
        (Category::Examination, &["??X*"]),
        (
            Category::Laboratory,
            &[
                "L[0-9]*", "ALB_CR*", "APOB*", "BIOPRO*", "CBC*", "COT*", "CRP*", "FERTIN*",
                "FETIB*", "FOLATE*", "GHB*", "GLU*", "HDL*", "HEPA*", "HEPB*", "HEPC*", "HIV*",
                "HPV*", "INS*", "OGTT*", "PBCD*", "PFAS*", "TCHOL*", "TRIGLY*", "UCFLOW*",
                "UHG*", "UIO*", "UM*", "UTAS*", "VID*",
            ],
        ),
        (Category::Questionnaire, &["??Q*"]),
    ];

    rules
        .into_iter()
        .map(|(category, globs)| (category, globs.iter().map(|g| g.to_string()).collect()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────────────────────────────────────

/// Compiled glob rules, tried in category order.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Category, GlobSet)>,
}

impl Classifier {
    /// Compiles the rules; matching ignores case.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` for an invalid glob.
    pub fn new(rules: &BTreeMap<Category, Vec<String>>) -> Result<Self, AppError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (&category, patterns) in rules {
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                let glob = GlobBuilder::new(pattern)
                    .case_insensitive(true)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| {
                        AppError::Configuration(format!(
                            "Invalid {} rule '{}': {}",
                            category, pattern, e
                        ))
                    })?;
                builder.add(glob);
            }
            let set = builder.build().map_err(|e| {
                AppError::Configuration(format!("Invalid {} rules: {}", category, e))
            })?;
            compiled.push((category, set));
        }
        Ok(Self { rules: compiled })
    }

    /// Category whose rules match the file name of `path`.
    ///
    /// A name that matches nothing is retried without its release prefix.
    pub fn match_name(&self, path: &Path) -> Option<Category> {
        let name = path.file_name()?.to_str()?;
        self.match_str(name).or_else(|| {
            strip_prefix_ignore_case(name, PRE_PANDEMIC_PREFIX).and_then(|rest| self.match_str(rest))
        })
    }

    fn match_str(&self, name: &str) -> Option<Category> {
        self.rules
            .iter()
            .find(|(_, set)| set.is_match(name))
            .map(|(category, _)| *category)
    }

    /// Bucket of `path`: a matching rule, else a category-named parent
    /// directory, else the unclassified bucket.
    pub fn bucket_for(&self, path: &Path) -> String {
        self.match_name(path)
            .or_else(|| Category::from_path(path))
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| UNCLASSIFIED_BUCKET.to_string())
    }

    /// Assigns every inventoried file to exactly one bucket.
    pub fn classify(&self, inventory: &Inventory) -> ClassificationManifest {
        let mut manifest = ClassificationManifest::new();
        manifest.insert(UNCLASSIFIED_BUCKET.to_string(), Vec::new());
        for path in inventory.keys() {
            let bucket = self.bucket_for(Path::new(path));
            manifest.entry(bucket).or_default().push(path.clone());
        }
        manifest
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classified tree
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for one copy pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CopyStats {
    pub copied: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Copies classified files to `{root}/{bucket}/{year}_{file}` and merged
/// outputs to `{root}/{bucket}/{name}.csv`, the bucket of their first member.
///
/// Destinations that already exist with the same size are left alone.
pub fn materialize_classified(
    root: &Path,
    classification: &ClassificationManifest,
    inventory: &Inventory,
    merged: &MergedManifest,
    failures: &FailureLog,
) -> (ClassifiedManifest, CopyStats) {
    let mut member_bucket: BTreeMap<&str, &str> = BTreeMap::new();
    let mut jobs: Vec<(String, PathBuf, PathBuf)> = Vec::new();

    for (bucket, members) in classification {
        for member in members {
            member_bucket.insert(member.as_str(), bucket.as_str());
            let Some(entry) = inventory.get(member) else {
                continue;
            };
            let year = entry.year.as_deref().unwrap_or(OTHER_YEAR);
            let dest = root.join(bucket).join(format!("{}_{}", year, entry.file_name));
            jobs.push((bucket.clone(), PathBuf::from(member), dest));
        }
    }

    for (name, entry) in merged {
        let bucket = entry
            .members
            .first()
            .and_then(|m| member_bucket.get(m.as_str()))
            .copied()
            .unwrap_or(UNCLASSIFIED_BUCKET);
        let dest = root.join(bucket).join(format!("{}.csv", name));
        jobs.push((bucket.to_string(), PathBuf::from(&entry.output), dest));
    }

    let mut manifest = ClassifiedManifest::new();
    let mut stats = CopyStats::default();
    for (bucket, source, dest) in jobs {
        match copy_if_changed(&source, &dest) {
            Ok(true) => stats.copied += 1,
            Ok(false) => stats.unchanged += 1,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Classified copy failed");
                failures.record(
                    PipelineStage::Analyse,
                    source.to_string_lossy(),
                    Category::parse(&bucket),
                    &e,
                    1,
                );
                stats.failed += 1;
                continue;
            }
        }
        manifest
            .entry(bucket)
            .or_default()
            .push(dest.to_string_lossy().into_owned());
    }
    for paths in manifest.values_mut() {
        paths.sort();
    }

    info!(
        copied = stats.copied,
        unchanged = stats.unchanged,
        failed = stats.failed,
        root = %root.display(),
        "Classified tree updated"
    );
    (manifest, stats)
}

/// Copies `source` to `dest` through a `.part` sibling. Returns false when
/// `dest` already holds the same bytes.
fn copy_if_changed(source: &Path, dest: &Path) -> Result<bool, AppError> {
    let source_len = std::fs::metadata(source)
        .map_err(|e| AppError::fs(source, e))?
        .len();
    if let Ok(existing) = std::fs::metadata(dest) {
        // Equal length alone says nothing; a rewritten table often keeps its size.
        if existing.len() == source_len && file_digest(dest).ok() == Some(file_digest(source)?) {
            debug!(dest = %dest.display(), "Classified copy up to date");
            return Ok(false);
        }
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::fs(parent, e))?;
    }
    let part = part_path(dest);
    std::fs::copy(source, &part).map_err(|e| AppError::fs(&part, e))?;
    std::fs::rename(&part, dest).map_err(|e| {
        let _ = std::fs::remove_file(&part);
        AppError::fs(dest, e)
    })?;
    Ok(true)
}

fn file_digest(path: &Path) -> Result<[u8; 32], AppError> {
    let mut file = std::fs::File::open(path).map_err(|e| AppError::fs(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| AppError::fs(path, e))?;
    Ok(hasher.finalize().into())
}
