//! Survey component categories.
//!
//! Categories partition the download tree (`{year}/{category}/...`) and the
//! classification buckets. The set is closed; every branch on a category is an
//! exhaustive `match`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Bucket name for files no category rule claims.
pub const UNCLASSIFIED_BUCKET: &str = "unclassified";

/// NHANES data component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Demographics,
    Dietary,
    Examination,
    Laboratory,
    Questionnaire,
    /// Limited-access component, listed by the survey site as `Non`.
    #[serde(rename = "Non")]
    LimitedAccess,
    /// Records a listing could not attribute to a component.
    Other,
}

impl Category {
    /// Every category, in classification priority order.
    pub const ALL: [Category; 7] = [
        Category::Demographics,
        Category::Dietary,
        Category::Examination,
        Category::Laboratory,
        Category::Questionnaire,
        Category::LimitedAccess,
        Category::Other,
    ];

    /// Categories that correspond to a published component page.
    pub const COMPONENTS: [Category; 6] = [
        Category::Demographics,
        Category::Dietary,
        Category::Examination,
        Category::Laboratory,
        Category::Questionnaire,
        Category::LimitedAccess,
    ];

    /// Directory and listing-file name for this category.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Demographics => "Demographics",
            Category::Dietary => "Dietary",
            Category::Examination => "Examination",
            Category::Laboratory => "Laboratory",
            Category::Questionnaire => "Questionnaire",
            Category::LimitedAccess => "Non",
            Category::Other => "Other",
        }
    }

    /// Parses a category name, returning `None` for unknown names.
    ///
    /// Matching is case-insensitive and also accepts the long form
    /// `LimitedAccess` for the `Non` component.
    pub fn parse(name: &str) -> Option<Category> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("LimitedAccess") || name.eq_ignore_ascii_case("Non-Public") {
            return Some(Category::LimitedAccess);
        }
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    /// Extracts the category from a listing page URL's `Component=` parameter.
    ///
    /// Unknown or absent components map to [`Category::Other`].
    pub fn from_component_url(url: &url::Url) -> Category {
        url.query_pairs()
            .find(|(key, _)| key.eq_ignore_ascii_case("component"))
            .and_then(|(_, value)| {
                let head: String = value.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
                Category::parse(&head)
            })
            .unwrap_or(Category::Other)
    }

    /// Category named by the nearest parent directory of `path`, if any.
    pub fn from_path(path: &std::path::Path) -> Option<Category> {
        path.parent()?
            .components()
            .rev()
            .filter_map(|c| c.as_os_str().to_str())
            .find_map(Category::parse)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::parse(s).ok_or_else(|| {
            let known: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
            AppError::Configuration(format!(
                "Unknown category '{}' (expected one of: {})",
                s,
                known.join(", ")
            ))
        })
    }
}
