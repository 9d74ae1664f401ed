//! Batch manager: bounded, disk-backed changeset parts.

mod builder;
mod info;

pub use builder::{BatchBuilder, BatchLimit, MIN_BATCH_BYTES, MIN_BATCH_ROWS};
pub use info::{part_file_name, BatchInfo, BatchPartInfo, BatchPartTableInfo, SUMMARY_FILE};
