//! Column signatures: the comparison key that decides which tables merge.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ColumnOrderPolicy;

/// Hex characters kept from the digest.
const KEY_LEN: usize = 12;

/// Column names of a table plus the key they compare by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSignature {
    pub columns: Vec<String>,
    pub key: String,
}

impl ColumnSignature {
    /// Derives the signature of `columns` under `policy`.
    ///
    /// With [`ColumnOrderPolicy::Ignore`] the key is computed over the sorted
    /// names, so reordered headers share a key.
    pub fn new(columns: Vec<String>, policy: ColumnOrderPolicy) -> Self {
        let key = signature_key(&columns, policy);
        Self { columns, key }
    }
}

/// Short SHA-256 of the canonical column list.
pub fn signature_key(columns: &[String], policy: ColumnOrderPolicy) -> String {
    let mut canonical: Vec<&str> = columns.iter().map(String::as_str).collect();
    if policy == ColumnOrderPolicy::Ignore {
        canonical.sort_unstable();
    }

    let mut hasher = Sha256::new();
    for name in canonical {
        hasher.update(name.as_bytes());
        // Unit separator; cannot appear in a header read as CSV text.
        hasher.update([0x1F]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..KEY_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_is_twelve_hex_chars() {
        let key = signature_key(&cols(&["ID", "AGE"]), ColumnOrderPolicy::Ignore);
        assert_eq!(key.len(), 12);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn order_ignored_by_default_policy() {
        let a = ColumnSignature::new(cols(&["ID", "AGE", "SEX"]), ColumnOrderPolicy::Ignore);
        let b = ColumnSignature::new(cols(&["SEX", "ID", "AGE"]), ColumnOrderPolicy::Ignore);
        assert_eq!(a.key, b.key);
        assert_ne!(a.columns, b.columns);
    }

    #[test]
    fn order_matters_when_respected() {
        let a = signature_key(&cols(&["ID", "AGE"]), ColumnOrderPolicy::Respect);
        let b = signature_key(&cols(&["AGE", "ID"]), ColumnOrderPolicy::Respect);
        assert_ne!(a, b);
    }

    #[test]
    fn extra_column_changes_key() {
        let a = signature_key(&cols(&["ID", "AGE", "SEX"]), ColumnOrderPolicy::Ignore);
        let b = signature_key(&cols(&["ID", "AGE", "SEX", "INCOME"]), ColumnOrderPolicy::Ignore);
        assert_ne!(a, b);
    }

    #[test]
    fn concatenation_does_not_collide() {
        let a = signature_key(&cols(&["AB", "C"]), ColumnOrderPolicy::Respect);
        let b = signature_key(&cols(&["A", "BC"]), ColumnOrderPolicy::Respect);
        assert_ne!(a, b);
    }
}
