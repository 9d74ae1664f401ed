//! Splitting a changeset into bounded parts.

use super::info::BatchInfo;
use crate::container::ContainerSet;
use crate::error::CoreResult;
use crate::row::SyncRow;
use crate::schema::{SyncSet, TableKey};
use rowsync_codec::{SerializationFormat, Value};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Smallest row capacity of a part.
pub const MIN_BATCH_ROWS: usize = 1;

/// Smallest byte capacity of a part.
pub const MIN_BATCH_BYTES: usize = 1024;

/// Capacity of one batch part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchLimit {
    /// At most this many rows per part.
    Rows(usize),
    /// At most roughly this many serialized bytes per part.
    Bytes(usize),
}

impl Default for BatchLimit {
    fn default() -> Self {
        BatchLimit::Bytes(2 * 1024 * 1024)
    }
}

impl BatchLimit {
    /// Applies the absolute floors.
    #[must_use]
    pub fn clamped(self) -> Self {
        match self {
            BatchLimit::Rows(n) => BatchLimit::Rows(n.max(MIN_BATCH_ROWS)),
            BatchLimit::Bytes(n) => BatchLimit::Bytes(n.max(MIN_BATCH_BYTES)),
        }
    }

    fn is_reached(self, rows: usize, bytes: usize) -> bool {
        match self {
            BatchLimit::Rows(n) => rows >= n,
            BatchLimit::Bytes(n) => bytes >= n,
        }
    }
}

/// Accumulates rows and flushes a part each time the limit is reached.
///
/// Flushing is lazy: a full buffer is only written when another row
/// arrives, so the final part is never empty unless the whole changeset
/// is. A changeset that fits in one part stays in memory even when a
/// root directory is configured.
#[derive(Debug)]
pub struct BatchBuilder {
    info: BatchInfo,
    root: Option<PathBuf>,
    limit: BatchLimit,
    current: ContainerSet,
    current_rows: usize,
    current_bytes: usize,
    next_index: u32,
}

impl BatchBuilder {
    /// Creates a builder.
    ///
    /// # Arguments
    ///
    /// * `root` - Parent directory for disk-backed parts, `None` for memory only
    /// * `directory_name` - Name of this batch's directory under `root`
    /// * `sanitized_schema` - Schema the rows are built against
    /// * `format` - Codec for part files
    /// * `limit` - Part capacity, clamped to its floor
    pub fn new(
        root: Option<PathBuf>,
        directory_name: impl Into<String>,
        sanitized_schema: SyncSet,
        format: SerializationFormat,
        limit: BatchLimit,
    ) -> Self {
        let mut info = BatchInfo::in_memory(sanitized_schema, format);
        info.directory_name = directory_name.into();
        Self {
            info,
            root,
            limit: limit.clamped(),
            current: ContainerSet::new(),
            current_rows: 0,
            current_bytes: 0,
            next_index: 0,
        }
    }

    /// Sets the capture timestamp recorded in the batch.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.info.timestamp = timestamp;
    }

    /// Adds one row.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing the previous part fails.
    pub fn add_row(&mut self, row: &SyncRow) -> CoreResult<()> {
        if self.current_rows > 0 && self.limit.is_reached(self.current_rows, self.current_bytes) {
            self.flush(false)?;
        }
        self.current_bytes += row.buffer().iter().map(Value::estimated_size).sum::<usize>() + 2;
        self.current_rows += 1;
        self.current.push(row.table(), row.buffer().to_vec());
        Ok(())
    }

    /// Adds every row of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing a part fails.
    pub fn add_rows<'a>(&mut self, rows: impl IntoIterator<Item = &'a SyncRow>) -> CoreResult<()> {
        rows.into_iter().try_for_each(|row| self.add_row(row))
    }

    /// Flushes the remaining rows as the last part and returns the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the last part cannot be written.
    pub fn finish(mut self) -> CoreResult<BatchInfo> {
        self.flush(true)?;
        self.info.ensure_last_batch()?;
        if !self.info.is_in_memory() {
            self.info.save_summary()?;
        }
        info!(
            batch = %self.info.directory_name,
            parts = self.info.parts.len(),
            rows = self.info.rows_count,
            in_memory = self.info.is_in_memory(),
            "batch created"
        );
        Ok(self.info)
    }

    fn flush(&mut self, is_last: bool) -> CoreResult<()> {
        if !is_last && self.info.root.is_none() && self.root.is_some() {
            // More than one part: spill to disk from here on.
            self.info.root = self.root.clone();
        }
        let index = self.next_index;
        let container = std::mem::take(&mut self.current);
        debug!(index, rows = self.current_rows, is_last, "flushing batch part");
        self.info.write_part(index, container, is_last)?;
        self.next_index += 1;
        self.current_rows = 0;
        self.current_bytes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowState;
    use crate::schema::{DataType, SyncColumn, SyncTable};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn table() -> SyncTable {
        let mut t = SyncTable::new("Item");
        t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        t.add_column(SyncColumn::new("Label", DataType::Text)).unwrap();
        t.set_primary_keys(["Id"]).unwrap();
        t
    }

    fn rows(t: &SyncTable, n: usize) -> Vec<SyncRow> {
        (0..n)
            .map(|i| {
                SyncRow::from_values(
                    t,
                    RowState::Modified,
                    vec![Value::Integer(i as i64), Value::Text("x".repeat(20))],
                )
                .unwrap()
            })
            .collect()
    }

    fn build(root: Option<PathBuf>, n: usize, limit: BatchLimit) -> BatchInfo {
        let t = table();
        let schema = SyncSet::new().with_table(t.clone()).unwrap();
        let mut builder = BatchBuilder::new(root, "batch", schema, SerializationFormat::Json, limit);
        builder.add_rows(&rows(&t, n)).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn empty_changeset_yields_one_empty_part() {
        let info = build(None, 0, BatchLimit::Rows(10));
        assert_eq!(info.parts.len(), 1);
        assert!(info.parts[0].is_last);
        assert_eq!(info.rows_count, 0);
        assert!(info.load_part(0).unwrap().is_empty());
    }

    #[test]
    fn single_part_stays_in_memory() {
        let dir = TempDir::new().unwrap();
        let info = build(Some(dir.path().to_path_buf()), 5, BatchLimit::Rows(10));
        assert!(info.is_in_memory());
        assert_eq!(info.parts.len(), 1);
        assert!(!dir.path().join("batch").exists());
    }

    #[test]
    fn multiple_parts_spill_to_disk() {
        let dir = TempDir::new().unwrap();
        let info = build(Some(dir.path().to_path_buf()), 25, BatchLimit::Rows(10));
        assert!(!info.is_in_memory());
        assert_eq!(info.parts.len(), 3);
        let batch_dir = dir.path().join("batch");
        for part in &info.parts {
            assert!(batch_dir.join(&part.file_name).exists());
        }
        assert!(batch_dir.join(crate::batch::SUMMARY_FILE).exists());
        assert_eq!(info.load_part(2).unwrap().rows_count(), 5);
    }

    #[test]
    fn byte_limit_splits_parts() {
        let info = build(None, 200, BatchLimit::Bytes(1024));
        assert!(info.parts.len() > 1);
        assert_eq!(info.rows_count, 200);
        assert!(info.check_last_batch().is_ok());
    }

    #[test]
    fn limits_are_floored() {
        assert_eq!(BatchLimit::Rows(0).clamped(), BatchLimit::Rows(1));
        assert_eq!(BatchLimit::Bytes(10).clamped(), BatchLimit::Bytes(1024));
        assert_eq!(BatchLimit::Rows(7).clamped(), BatchLimit::Rows(7));
    }

    proptest! {
        #[test]
        fn part_count_is_ceiling(rows in 0usize..120, capacity in 1usize..17) {
            let info = build(None, rows, BatchLimit::Rows(capacity));
            let expected = if rows == 0 { 1 } else { rows.div_ceil(capacity) };
            prop_assert_eq!(info.parts.len(), expected);
            prop_assert_eq!(info.rows_count as usize, rows);
            let last: Vec<_> = info.parts.iter().filter(|p| p.is_last).collect();
            prop_assert_eq!(last.len(), 1);
            prop_assert_eq!(last[0].index as usize, info.parts.len() - 1);
        }
    }
}
