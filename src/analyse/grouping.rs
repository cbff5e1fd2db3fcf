//! Stem grouping and column-consistency check.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ColumnOrderPolicy;

use super::inventory::{Inventory, InventoryEntry};
use super::signature::ColumnSignature;

/// Release prefix of the 2017-March 2020 pre-pandemic files.
pub(crate) const PRE_PANDEMIC_PREFIX: &str = "P_";

/// Cycle labels by release-letter suffix.
const RELEASE_LETTERS: [(char, &str); 10] = [
    ('A', "1999-2000"),
    ('B', "2001-2002"),
    ('C', "2003-2004"),
    ('D', "2005-2006"),
    ('E', "2007-2008"),
    ('F', "2009-2010"),
    ('G', "2011-2012"),
    ('H', "2013-2014"),
    ('I', "2015-2016"),
    ('J', "2017-2018"),
];

const PRE_PANDEMIC_CYCLE: &str = "2017-2020";
const POST_PANDEMIC: (char, &str) = ('L', "2021-2023");

fn cycle_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}(-\d{4})?$").expect("static regex is valid"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Naming
// ─────────────────────────────────────────────────────────────────────────────

/// Grouping stem of a file name: extension and release prefix removed, then
/// the text before the first `_`.
///
/// `DEMO_J.csv` and `P_DEMO.csv` both give `DEMO`.
pub fn stem_of(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let base = strip_prefix_ignore_case(base, PRE_PANDEMIC_PREFIX).unwrap_or(base);
    base.split('_').next().unwrap_or(base).to_string()
}

/// Survey cycle of a file.
///
/// Tried in order: a `NNNN` or `NNNN-NNNN` directory between `root` and the
/// file, a four-digit token in the file name, the release-letter suffix.
/// Directories above `root` never count.
pub fn infer_year(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let from_dirs = relative.parent().and_then(|parent| {
        parent
            .components()
            .rev()
            .filter_map(|c| c.as_os_str().to_str())
            .find(|c| cycle_dir_re().is_match(c))
            .map(str::to_string)
    });
    if from_dirs.is_some() {
        return from_dirs;
    }

    let base = path.file_stem()?.to_str()?;
    if let Some(token) = base
        .split(|c: char| c == '_' || c == '-')
        .find(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
    {
        return Some(token.to_string());
    }

    if strip_prefix_ignore_case(base, PRE_PANDEMIC_PREFIX).is_some() {
        return Some(PRE_PANDEMIC_CYCLE.to_string());
    }

    let (_, suffix) = base.rsplit_once('_')?;
    let mut chars = suffix.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() {
        return None;
    }
    RELEASE_LETTERS
        .iter()
        .chain(std::iter::once(&POST_PANDEMIC))
        .find(|(l, _)| *l == letter)
        .map(|(_, cycle)| cycle.to_string())
}

/// Sort key of a cycle label: its first year, unknown cycles last.
pub fn year_sort_key(year: Option<&str>) -> u32 {
    year.and_then(|y| y.get(..4))
        .and_then(|y| y.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Output name of a merged sub-group.
pub fn merge_name(stem: &str, key: &str, eligible_in_stem: usize) -> String {
    if eligible_in_stem <= 1 {
        stem.to_string()
    } else {
        format!("{}__{}", stem, key)
    }
}

/// `s` without `prefix` (ASCII case-insensitive), if it has it and more.
pub(crate) fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) && s.len() > prefix.len() {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Groups
// ─────────────────────────────────────────────────────────────────────────────

/// Files of one stem that share a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    pub key: String,
    /// Header of the first member in merge order.
    pub columns: Vec<String>,
    /// Member paths in merge order.
    pub members: Vec<String>,
    pub eligible: bool,
}

/// All files of one stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemGroup {
    /// True when every readable member shares one signature.
    pub consistent: bool,
    pub subgroups: Vec<SubGroup>,
    pub unreadable: Vec<String>,
}

impl StemGroup {
    pub fn eligible(&self) -> impl Iterator<Item = &SubGroup> {
        self.subgroups.iter().filter(|s| s.eligible)
    }
}

/// Stem to group.
pub type GroupManifest = BTreeMap<String, StemGroup>;

/// Groups inventoried files by stem, then by signature.
///
/// Members are ordered by survey year, then path. Sub-groups with two or
/// more members are eligible for merging.
pub fn group_inventory(inventory: &Inventory, policy: ColumnOrderPolicy) -> GroupManifest {
    let mut by_stem: BTreeMap<&str, Vec<(&String, &InventoryEntry)>> = BTreeMap::new();
    for (path, entry) in inventory {
        by_stem.entry(entry.stem.as_str()).or_default().push((path, entry));
    }

    let mut manifest = GroupManifest::new();
    for (stem, mut entries) in by_stem {
        entries.sort_by(|(pa, a), (pb, b)| {
            year_sort_key(a.year.as_deref())
                .cmp(&year_sort_key(b.year.as_deref()))
                .then_with(|| pa.cmp(pb))
        });

        let mut subgroups: BTreeMap<String, SubGroup> = BTreeMap::new();
        let mut unreadable = Vec::new();
        for (path, entry) in entries {
            let Some(columns) = &entry.columns else {
                unreadable.push(path.clone());
                continue;
            };
            let signature = ColumnSignature::new(columns.clone(), policy);
            subgroups
                .entry(signature.key.clone())
                .or_insert_with(|| SubGroup {
                    key: signature.key,
                    columns: signature.columns,
                    members: Vec::new(),
                    eligible: false,
                })
                .members
                .push(path.clone());
        }

        let mut subgroups: Vec<SubGroup> = subgroups.into_values().collect();
        for subgroup in &mut subgroups {
            subgroup.eligible = subgroup.members.len() >= 2;
        }

        manifest.insert(
            stem.to_string(),
            StemGroup {
                consistent: subgroups.len() <= 1,
                subgroups,
                unreadable,
            },
        );
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file_name: &str, year: Option<&str>, columns: Option<&[&str]>) -> InventoryEntry {
        InventoryEntry {
            file_name: file_name.to_string(),
            stem: stem_of(file_name),
            year: year.map(str::to_string),
            size: 1,
            modified: 0,
            columns: columns.map(|c| c.iter().map(|s| s.to_string()).collect()),
            error: columns.is_none().then(|| "unreadable".to_string()),
        }
    }

    #[test]
    fn stems_drop_suffix_and_release_prefix() {
        assert_eq!(stem_of("DEMO_J.csv"), "DEMO");
        assert_eq!(stem_of("P_DEMO.csv"), "DEMO");
        assert_eq!(stem_of("DEMO.csv"), "DEMO");
        assert_eq!(stem_of("DR1TOT_J.csv"), "DR1TOT");
        assert_eq!(stem_of("DEMO_2015.csv"), "DEMO");
    }

    #[test]
    fn year_from_directory_then_token_then_letter() {
        assert_eq!(
            infer_year(Path::new("csv/2017-2018/Demographics/DEMO_J.csv"), Path::new("csv")).as_deref(),
            Some("2017-2018")
        );
        assert_eq!(infer_year(Path::new("csv/2019/X_A.csv"), Path::new("csv")).as_deref(), Some("2019"));
        assert_eq!(infer_year(Path::new("csv/DEMO_2015.csv"), Path::new("csv")).as_deref(), Some("2015"));
        assert_eq!(infer_year(Path::new("csv/DEMO_I.csv"), Path::new("csv")).as_deref(), Some("2015-2016"));
        assert_eq!(infer_year(Path::new("csv/P_DEMO.csv"), Path::new("csv")).as_deref(), Some("2017-2020"));
        assert_eq!(infer_year(Path::new("csv/DEMO_L.csv"), Path::new("csv")).as_deref(), Some("2021-2023"));
        assert_eq!(infer_year(Path::new("csv/DEMO.csv"), Path::new("csv")), None);
    }

    #[test]
    fn year_directories_above_root_are_ignored() {
        let root = Path::new("/srv/2020/nhanes/csv");
        assert_eq!(infer_year(&root.join("Demographics/DEMO_I.csv"), root).as_deref(), Some("2015-2016"));
        assert_eq!(infer_year(&root.join("Demographics/DEMO.csv"), root), None);
        assert_eq!(
            infer_year(&root.join("2017-2018/DEMO.csv"), root).as_deref(),
            Some("2017-2018")
        );
    }

    #[test]
    fn unknown_year_sorts_last() {
        assert!(year_sort_key(Some("2015")) < year_sort_key(Some("2017-2018")));
        assert!(year_sort_key(Some("2021-2023")) < year_sort_key(None));
    }

    #[test]
    fn same_columns_merge_in_year_order_and_extra_column_stays_single() {
        let mut inventory = Inventory::new();
        inventory.insert(
            "csv/DEMO_2017.csv".into(),
            entry("DEMO_2017.csv", Some("2017"), Some(&["ID", "AGE", "SEX"][..])),
        );
        inventory.insert(
            "csv/DEMO_2015.csv".into(),
            entry("DEMO_2015.csv", Some("2015"), Some(&["ID", "AGE", "SEX"][..])),
        );
        inventory.insert(
            "csv/DEMO_2019.csv".into(),
            entry("DEMO_2019.csv", Some("2019"), Some(&["ID", "AGE", "SEX", "INCOME"][..])),
        );

        let groups = group_inventory(&inventory, ColumnOrderPolicy::Ignore);
        let demo = &groups["DEMO"];

        assert!(!demo.consistent);
        assert_eq!(demo.subgroups.len(), 2);
        let eligible: Vec<&SubGroup> = demo.eligible().collect();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].members, vec!["csv/DEMO_2015.csv", "csv/DEMO_2017.csv"]);
        let single = demo.subgroups.iter().find(|s| !s.eligible).unwrap();
        assert_eq!(single.members, vec!["csv/DEMO_2019.csv"]);
        assert_eq!(single.columns.len(), 4);
    }

    #[test]
    fn unreadable_files_are_listed_separately() {
        let mut inventory = Inventory::new();
        inventory.insert("a/BMX_J.csv".into(), entry("BMX_J.csv", Some("2017-2018"), Some(&["SEQN"][..])));
        inventory.insert("a/BMX_I.csv".into(), entry("BMX_I.csv", Some("2015-2016"), None));

        let groups = group_inventory(&inventory, ColumnOrderPolicy::Ignore);
        let bmx = &groups["BMX"];
        assert!(bmx.consistent);
        assert_eq!(bmx.unreadable, vec!["a/BMX_I.csv"]);
        assert_eq!(bmx.eligible().count(), 0);
    }

    #[test]
    fn column_order_policy_splits_reordered_headers() {
        let mut inventory = Inventory::new();
        inventory.insert("x/A_1.csv".into(), entry("A_1.csv", None, Some(&["ID", "AGE"][..])));
        inventory.insert("x/A_2.csv".into(), entry("A_2.csv", None, Some(&["AGE", "ID"][..])));

        let ignore = group_inventory(&inventory, ColumnOrderPolicy::Ignore);
        assert_eq!(ignore["A"].subgroups.len(), 1);

        let respect = group_inventory(&inventory, ColumnOrderPolicy::Respect);
        assert_eq!(respect["A"].subgroups.len(), 2);
    }

    #[test]
    fn merge_names_only_disambiguate_when_needed() {
        assert_eq!(merge_name("DEMO", "abc123def456", 1), "DEMO");
        assert_eq!(merge_name("DEMO", "abc123def456", 2), "DEMO__abc123def456");
    }
}
