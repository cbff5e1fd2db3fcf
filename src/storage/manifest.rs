//! JSON (and optional YAML) manifest persistence.
//!
//! Manifests are written whole: serialized to a temporary file in the target
//! directory and renamed over the destination. Map-typed documents use
//! `BTreeMap` so keys are written sorted and re-runs produce identical bytes.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::AppError;

/// Writes `value` to `path` as pretty JSON, atomically.
///
/// When `yaml_mirror` is set, the same document is also written beside it
/// with a `.yaml` extension.
///
/// # Errors
///
/// Returns `AppError::Filesystem` if serialization or persistence fails.
pub fn write_manifest<T: Serialize>(path: &Path, value: &T, yaml_mirror: bool) -> Result<(), AppError> {
    let mut json = serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::fs(path, format!("cannot serialize manifest: {}", e)))?;
    json.push(b'\n');
    write_atomic(path, &json)?;

    if yaml_mirror {
        let yaml_path = path.with_extension("yaml");
        let yaml = serde_yaml::to_string(value)
            .map_err(|e| AppError::fs(&yaml_path, format!("cannot serialize manifest: {}", e)))?;
        write_atomic(&yaml_path, yaml.as_bytes())?;
    }

    debug!(path = %path.display(), "Manifest written");
    Ok(())
}

/// Reads a previously written manifest.
///
/// A missing or unparsable manifest yields `None`; the caller then rebuilds
/// from scratch.
pub fn read_manifest<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return None,
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable manifest");
            None
        }
    }
}

/// Replaces `path` with `bytes` via a temporary sibling file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(&parent).map_err(|e| AppError::fs(&parent, e))?;

    let mut temp = NamedTempFile::new_in(&parent)
        .map_err(|e| AppError::fs(&parent, format!("cannot create temporary file: {}", e)))?;
    temp.write_all(bytes).map_err(|e| AppError::fs(path, e))?;
    temp.flush().map_err(|e| AppError::fs(path, e))?;
    temp.persist(path)
        .map_err(|e| AppError::fs(path, format!("cannot persist: {}", e.error)))?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
