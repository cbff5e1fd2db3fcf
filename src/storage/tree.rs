//! Partitioned file tree helpers.
//!
//! Every stage reads one tree and writes another whose layout mirrors it, so
//! the mapping from source to destination path is fixed and collision-free.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::AppError;

/// Suffix of in-progress downloads.
pub const PART_SUFFIX: &str = "part";

/// Processing stage a file on disk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    /// Downloaded transport file.
    RawBinary,
    /// CSV produced by the converter.
    ConvertedText,
    /// CSV produced by the merger.
    Merged,
}

impl FileStage {
    /// File extension for this stage, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileStage::RawBinary => "xpt",
            FileStage::ConvertedText | FileStage::Merged => "csv",
        }
    }

    /// True if `path` carries this stage's extension (any case).
    pub fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(self.extension()))
            .unwrap_or(false)
    }
}

/// A file in one of the partitioned trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub stage: FileStage,
}

impl LocalFile {
    /// File name as UTF-8, lossy.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lists every file of `stage` under `root`, sorted by path.
///
/// Directories in `exclude` are not descended into and `.part` files are
/// ignored. Entries that cannot be read are logged and skipped.
///
/// # Errors
///
/// Returns `AppError::Configuration` if `root` is not a directory.
pub fn collect_files(
    root: &Path,
    stage: FileStage,
    exclude: &[PathBuf],
) -> Result<Vec<LocalFile>, AppError> {
    if !root.is_dir() {
        return Err(AppError::Configuration(format!(
            "Input directory {} does not exist",
            root.display()
        )));
    }

    let exclude = canonical_exclusions(exclude);
    let mut files: Vec<LocalFile> = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && is_excluded(entry.path(), &exclude)));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable tree entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_part_file(path) || !stage.matches(path) {
            continue;
        }
        files.push(LocalFile {
            path: path.to_path_buf(),
            stage,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Destination for `source` under `output_root`, keeping its path relative to
/// `input_root` and swapping the extension.
pub fn mirror_path(source: &Path, input_root: &Path, output_root: &Path, extension: &str) -> PathBuf {
    let relative = source.strip_prefix(input_root).unwrap_or(source);
    output_root.join(relative).with_extension(extension)
}

/// In-progress sibling of `path` (`{file}.part`).
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PART_SUFFIX);
    path.with_file_name(name)
}

/// True for in-progress download files.
pub fn is_part_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(PART_SUFFIX))
        .unwrap_or(false)
}

/// Resolves exclusions so that `./data/merged` and `data/merged` compare
/// equal. Directories that do not exist cannot be walked into and are dropped.
fn canonical_exclusions(exclude: &[PathBuf]) -> Vec<PathBuf> {
    exclude
        .iter()
        .filter_map(|path| std::fs::canonicalize(path).ok())
        .collect()
}

fn is_excluded(dir: &Path, exclude: &[PathBuf]) -> bool {
    if exclude.is_empty() {
        return false;
    }
    std::fs::canonicalize(dir)
        .map(|dir| exclude.contains(&dir))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn collects_matching_extension_case_insensitively() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "2017-2018/Demographics/DEMO_J.XPT");
        touch(root, "2017-2018/Dietary/dr1tot_j.xpt");
        touch(root, "2017-2018/Dietary/readme.txt");
        touch(root, "2017-2018/Dietary/DR2TOT_J.XPT.part");

        let files = collect_files(root, FileStage::RawBinary, &[]).unwrap();
        let names: Vec<String> = files.iter().map(|f| f.file_name()).collect();
        assert_eq!(names, vec!["DEMO_J.XPT", "dr1tot_j.xpt"]);
        assert!(files.iter().all(|f| f.stage == FileStage::RawBinary));
    }

    #[test]
    fn excluded_directories_are_not_walked() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "2015-2016/DEMO_I.csv");
        touch(root, "merged/DEMO.csv");

        let files = collect_files(root, FileStage::ConvertedText, &[root.join("merged")]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name(), "DEMO_I.csv");
    }

    #[test]
    fn exclusions_match_regardless_of_spelling() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("csv");
        touch(&root, "2015-2016/DEMO_I.csv");
        touch(&root, "merged/DEMO.csv");
        touch(&root, "classified/Demographics/DEMO.csv");

        let exclude = vec![
            root.join("2015-2016/../merged"),
            temp_dir.path().join("csv/./classified/../classified"),
        ];
        let files = collect_files(&root, FileStage::ConvertedText, &exclude).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name(), "DEMO_I.csv");
    }

    #[test]
    fn missing_root_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = collect_files(&temp_dir.path().join("absent"), FileStage::RawBinary, &[])
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn mirror_path_keeps_partitioning() {
        let dest = mirror_path(
            Path::new("/raw/2017-2018/Laboratory/GLU_J.XPT"),
            Path::new("/raw"),
            Path::new("/csv"),
            "csv",
        );
        assert_eq!(dest, PathBuf::from("/csv/2017-2018/Laboratory/GLU_J.csv"));
    }

    #[test]
    fn part_path_appends_suffix() {
        let part = part_path(Path::new("/raw/2017-2018/Dietary/DR1TOT_J.XPT"));
        assert_eq!(part, PathBuf::from("/raw/2017-2018/Dietary/DR1TOT_J.XPT.part"));
        assert!(is_part_file(&part));
        assert!(!is_part_file(Path::new("/raw/DR1TOT_J.XPT")));
    }
}
