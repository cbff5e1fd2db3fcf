//! Local file storage: partitioned trees, manifests and the failure log.

pub mod failure_log;
pub mod manifest;
pub mod tree;

pub use failure_log::{FailureLog, PipelineStage};
pub use manifest::{read_manifest, write_atomic, write_manifest};
pub use tree::{collect_files, mirror_path, part_path, FileStage, LocalFile};
