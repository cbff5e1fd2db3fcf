//! Inventory, column-consistency check, merge and classification of the
//! converted CSV tree.

pub mod classify;
pub mod grouping;
pub mod inventory;
pub mod merge;
mod pipeline;
pub mod signature;

pub use classify::{default_rules, Classifier};
pub use pipeline::{
    AnalyseReport, Analyser, CLASSIFICATION_MANIFEST, CLASSIFIED_MANIFEST, GROUPS_MANIFEST,
    INVENTORY_MANIFEST, MERGED_MANIFEST,
};
pub use signature::ColumnSignature;
