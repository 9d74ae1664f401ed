//! Batch descriptors and part storage.

use crate::container::ContainerSet;
use crate::error::{CoreError, CoreResult};
use crate::schema::{SyncSet, TableKey};
use rowsync_codec::SerializationFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the descriptor file written into a batch directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// Per-table row count of a batch part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPartTableInfo {
    /// Table key.
    pub table: TableKey,
    /// Rows of that table in the part.
    pub rows_count: u64,
}

/// One bounded slice of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPartInfo {
    /// Monotonic index, starting at 0.
    pub index: u32,
    /// File name inside the batch directory.
    pub file_name: String,
    /// True for exactly one part: the one with the highest index.
    pub is_last: bool,
    /// Row counts per table.
    pub tables: Vec<BatchPartTableInfo>,
    /// Payload of an in-memory part.
    #[serde(skip)]
    pub data: Option<ContainerSet>,
}

impl BatchPartInfo {
    /// Total rows in the part.
    #[must_use]
    pub fn rows_count(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_count).sum()
    }

    /// Builds the descriptor of a part from its payload.
    #[must_use]
    pub fn describe(index: u32, container: &ContainerSet, format: SerializationFormat, is_last: bool) -> Self {
        let first = container
            .tables
            .first()
            .map_or("empty", |t| t.table_name.as_str());
        Self {
            index,
            file_name: part_file_name(index, first, format),
            is_last,
            tables: container
                .tables
                .iter()
                .map(|t| BatchPartTableInfo {
                    table: t.key(),
                    rows_count: t.rows.len() as u64,
                })
                .collect(),
            data: None,
        }
    }
}

/// Deterministic part file name: index, first table, codec extension.
#[must_use]
pub fn part_file_name(index: u32, table_name: &str, format: SerializationFormat) -> String {
    let safe: String = table_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{index:06}_{safe}.{}", format.extension())
}

/// Describes one captured changeset.
///
/// A batch is either entirely in memory (`root` is `None`, part payloads
/// live in [`BatchPartInfo::data`]) or disk-backed with one file per part
/// under `root/directory_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Parent directory of the batch directory.
    #[serde(skip)]
    pub root: Option<PathBuf>,
    /// Batch directory name.
    pub directory_name: String,
    /// Parts in index order.
    pub parts: Vec<BatchPartInfo>,
    /// Schema the rows are interpreted against.
    pub sanitized_schema: SyncSet,
    /// Total rows across all parts.
    pub rows_count: u64,
    /// Store timestamp at which the changeset was captured.
    pub timestamp: i64,
    /// Codec of part files.
    pub format: SerializationFormat,
}

impl BatchInfo {
    /// Creates an empty in-memory batch.
    #[must_use]
    pub fn in_memory(sanitized_schema: SyncSet, format: SerializationFormat) -> Self {
        Self {
            root: None,
            directory_name: String::new(),
            parts: Vec::new(),
            sanitized_schema,
            rows_count: 0,
            timestamp: 0,
            format,
        }
    }

    /// Creates an empty batch that writes parts under `root/directory_name`.
    pub fn on_disk(
        root: impl Into<PathBuf>,
        directory_name: impl Into<String>,
        sanitized_schema: SyncSet,
        format: SerializationFormat,
    ) -> Self {
        Self {
            root: Some(root.into()),
            directory_name: directory_name.into(),
            ..Self::in_memory(sanitized_schema, format)
        }
    }

    /// Returns true if parts are held in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.root.is_none()
    }

    /// The batch directory, if disk-backed.
    #[must_use]
    pub fn directory_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join(&self.directory_name))
    }

    /// Returns true if any part carries rows.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.rows_count > 0
    }

    /// Parts in strict index order.
    pub fn parts_in_order(&self) -> impl Iterator<Item = &BatchPartInfo> {
        self.parts.iter()
    }

    /// Returns a part descriptor by index.
    #[must_use]
    pub fn part(&self, index: u32) -> Option<&BatchPartInfo> {
        self.parts.iter().find(|p| p.index == index)
    }

    /// Reads a part's payload, by index, in any order.
    ///
    /// # Errors
    ///
    /// Returns `BatchPartMissing` or `BatchPartCorrupt`; both are fatal for
    /// the session that owns the batch.
    pub fn load_part(&self, index: u32) -> CoreResult<ContainerSet> {
        let part = self
            .part(index)
            .ok_or_else(|| CoreError::batch_part_missing(index, &self.directory_name))?;
        if let Some(data) = &part.data {
            return Ok(data.clone());
        }
        let Some(dir) = self.directory_path() else {
            return Err(CoreError::batch_part_missing(index, &part.file_name));
        };
        let path = dir.join(&part.file_name);
        let bytes = fs::read(&path)
            .map_err(|_| CoreError::batch_part_missing(index, path.display().to_string()))?;
        let container: ContainerSet = self
            .format
            .decode(&bytes)
            .map_err(|e| CoreError::batch_part_corrupt(index, e.to_string()))?;
        debug!(index, path = %path.display(), rows = container.rows_count(), "loaded batch part");
        Ok(container)
    }

    /// Stores a part, replacing any part with the same index.
    ///
    /// Disk-backed batches write the payload to a file; in-memory batches
    /// keep it in the descriptor. Row totals are recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or written.
    pub fn write_part(&mut self, index: u32, container: ContainerSet, is_last: bool) -> CoreResult<()> {
        let mut part = BatchPartInfo::describe(index, &container, self.format, is_last);
        match self.directory_path() {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                let path = dir.join(&part.file_name);
                fs::write(&path, self.format.encode(&container)?)?;
                debug!(index, path = %path.display(), rows = part.rows_count(), "wrote batch part");
            }
            None => part.data = Some(container),
        }
        match self.parts.binary_search_by_key(&index, |p| p.index) {
            Ok(pos) => self.parts[pos] = part,
            Err(pos) => self.parts.insert(pos, part),
        }
        self.rows_count = self.parts.iter().map(BatchPartInfo::rows_count).sum();
        Ok(())
    }

    /// Moves an in-memory batch to `root/directory_name` and writes its
    /// summary. A disk-backed batch only gets its summary rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if a part or the summary cannot be written.
    pub fn persist_to(&mut self, root: impl Into<PathBuf>) -> CoreResult<()> {
        if self.is_in_memory() {
            self.root = Some(root.into());
            let parts = std::mem::take(&mut self.parts);
            for part in parts {
                let data = part.data.unwrap_or_default();
                self.write_part(part.index, data, part.is_last)?;
            }
        }
        self.save_summary()
    }

    /// Marks the highest-index part as the only last part.
    ///
    /// An empty batch gets a single empty part so that it stays valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the empty part cannot be written.
    pub fn ensure_last_batch(&mut self) -> CoreResult<()> {
        if self.parts.is_empty() {
            return self.write_part(0, ContainerSet::new(), true);
        }
        let last = self.parts.len() - 1;
        for (i, part) in self.parts.iter_mut().enumerate() {
            part.is_last = i == last;
        }
        Ok(())
    }

    /// Checks that parts are indexed 0..n without gaps and that exactly the
    /// highest one is flagged last.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` describing the first violation.
    pub fn check_last_batch(&self) -> CoreResult<()> {
        if self.parts.is_empty() {
            return Err(CoreError::invalid_batch("batch has no parts"));
        }
        for (expected, part) in self.parts.iter().enumerate() {
            if part.index as usize != expected {
                return Err(CoreError::invalid_batch(format!(
                    "part index {} found where {expected} was expected",
                    part.index
                )));
            }
        }
        let flagged: Vec<u32> = self.parts.iter().filter(|p| p.is_last).map(|p| p.index).collect();
        let max = self.parts.len() as u32 - 1;
        if flagged != [max] {
            return Err(CoreError::invalid_batch(format!(
                "parts {flagged:?} flagged last, expected only {max}"
            )));
        }
        Ok(())
    }

    /// Returns true once the last part and every part before it are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.check_last_batch().is_ok()
    }

    /// Writes `summary.json` into the batch directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for in-memory batches, or an I/O error.
    pub fn save_summary(&self) -> CoreResult<()> {
        let dir = self
            .directory_path()
            .ok_or_else(|| CoreError::invalid_operation("in-memory batch has no directory"))?;
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(dir.join(SUMMARY_FILE), json)?;
        Ok(())
    }

    /// Loads a batch from the `summary.json` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary is missing or unreadable.
    pub fn load_summary(dir: &Path) -> CoreResult<BatchInfo> {
        let bytes = fs::read(dir.join(SUMMARY_FILE))?;
        let mut info: BatchInfo = serde_json::from_slice(&bytes)?;
        info.root = dir.parent().map(Path::to_path_buf);
        if let Some(name) = dir.file_name() {
            info.directory_name = name.to_string_lossy().into_owned();
        }
        Ok(info)
    }

    /// Removes the batch directory if `may_clean` allows it.
    ///
    /// Failure is logged and swallowed. Returns true if the directory is gone.
    pub fn try_cleanup(&self, may_clean: impl FnOnce(&Path) -> bool) -> bool {
        let Some(dir) = self.directory_path() else {
            return true;
        };
        if !may_clean(&dir) {
            debug!(path = %dir.display(), "batch directory still in use, cleanup skipped");
            return false;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to clean up batch directory");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_codec::Value;
    use tempfile::TempDir;

    fn container(table: &str, rows: usize) -> ContainerSet {
        let mut set = ContainerSet::new();
        for i in 0..rows {
            set.push(
                &TableKey::new(table, ""),
                vec![Value::Integer(16), Value::Integer(i as i64)],
            );
        }
        set
    }

    #[test]
    fn file_names_are_deterministic() {
        assert_eq!(
            part_file_name(3, "Order Detail", SerializationFormat::Json),
            "000003_Order_Detail.json"
        );
        assert_eq!(
            part_file_name(12, "Product", SerializationFormat::Cbor),
            "000012_Product.cbor"
        );
    }

    #[test]
    fn parts_written_out_of_order_are_read_by_index() {
        let dir = TempDir::new().unwrap();
        let mut info = BatchInfo::on_disk(dir.path(), "b1", SyncSet::new(), SerializationFormat::Json);
        info.write_part(1, container("B", 2), true).unwrap();
        info.write_part(0, container("A", 3), false).unwrap();
        let order: Vec<u32> = info.parts_in_order().map(|p| p.index).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(info.rows_count, 5);
        assert_eq!(info.load_part(1).unwrap().rows_count(), 2);
        assert!(info.is_complete());
    }

    #[test]
    fn rewriting_a_part_replaces_it() {
        let mut info = BatchInfo::in_memory(SyncSet::new(), SerializationFormat::Json);
        info.write_part(0, container("A", 3), true).unwrap();
        info.write_part(0, container("A", 3), true).unwrap();
        assert_eq!(info.parts.len(), 1);
        assert_eq!(info.rows_count, 3);
    }

    #[test]
    fn missing_part_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut info = BatchInfo::on_disk(dir.path(), "b2", SyncSet::new(), SerializationFormat::Json);
        info.write_part(0, container("A", 1), true).unwrap();
        fs::remove_file(dir.path().join("b2").join(&info.parts[0].file_name)).unwrap();
        let err = info.load_part(0).unwrap_err();
        assert!(matches!(err, CoreError::BatchPartMissing { index: 0, .. }));
        assert!(err.is_session_fatal());
    }

    #[test]
    fn corrupt_part_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut info = BatchInfo::on_disk(dir.path(), "b3", SyncSet::new(), SerializationFormat::Json);
        info.write_part(0, container("A", 1), true).unwrap();
        fs::write(dir.path().join("b3").join(&info.parts[0].file_name), b"{{{").unwrap();
        let err = info.load_part(0).unwrap_err();
        assert!(matches!(err, CoreError::BatchPartCorrupt { index: 0, .. }));
    }

    #[test]
    fn last_batch_checks() {
        let mut info = BatchInfo::in_memory(SyncSet::new(), SerializationFormat::Json);
        assert!(info.check_last_batch().is_err());
        info.write_part(0, container("A", 1), true).unwrap();
        info.write_part(1, container("A", 1), true).unwrap();
        assert!(info.check_last_batch().is_err());
        info.ensure_last_batch().unwrap();
        assert!(info.check_last_batch().is_ok());
        assert!(info.part(1).unwrap().is_last);
        assert!(!info.part(0).unwrap().is_last);

        let mut gap = BatchInfo::in_memory(SyncSet::new(), SerializationFormat::Json);
        gap.write_part(0, container("A", 1), false).unwrap();
        gap.write_part(2, container("A", 1), true).unwrap();
        assert!(!gap.is_complete());
    }

    #[test]
    fn summary_roundtrip_restores_location() {
        let dir = TempDir::new().unwrap();
        let mut info = BatchInfo::on_disk(dir.path(), "b4", SyncSet::new(), SerializationFormat::Cbor);
        info.timestamp = 99;
        info.write_part(0, container("A", 2), true).unwrap();
        info.save_summary().unwrap();

        let loaded = BatchInfo::load_summary(&dir.path().join("b4")).unwrap();
        assert_eq!(loaded.directory_name, "b4");
        assert_eq!(loaded.timestamp, 99);
        assert_eq!(loaded.format, SerializationFormat::Cbor);
        assert_eq!(loaded.load_part(0).unwrap().rows_count(), 2);
    }

    #[test]
    fn persisting_moves_parts_to_disk() {
        let dir = TempDir::new().unwrap();
        let mut info = BatchInfo::in_memory(SyncSet::new(), SerializationFormat::Json);
        info.directory_name = "snap".into();
        info.write_part(0, container("A", 4), true).unwrap();
        info.persist_to(dir.path()).unwrap();
        assert!(!info.is_in_memory());
        assert!(info.parts[0].data.is_none());
        let loaded = BatchInfo::load_summary(&dir.path().join("snap")).unwrap();
        assert_eq!(loaded.load_part(0).unwrap().rows_count(), 4);
    }

    #[test]
    fn cleanup_respects_predicate() {
        let dir = TempDir::new().unwrap();
        let mut info = BatchInfo::on_disk(dir.path(), "b5", SyncSet::new(), SerializationFormat::Json);
        info.write_part(0, container("A", 1), true).unwrap();
        let path = info.directory_path().unwrap();

        assert!(!info.try_cleanup(|_| false));
        assert!(path.exists());
        assert!(info.try_cleanup(|_| true));
        assert!(!path.exists());
        assert!(info.try_cleanup(|_| true));
    }
}
