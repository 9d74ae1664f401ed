//! Inspect command implementation.

use super::{CliError, CliResult};
use rowsync_core::batch::SUMMARY_FILE;
use rowsync_core::BatchInfo;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Batch inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Batch directory.
    pub path: String,
    /// Codec of the part files.
    pub format: String,
    /// Capture timestamp.
    pub timestamp: i64,
    /// Total rows across parts.
    pub rows_count: u64,
    /// Number of parts.
    pub part_count: usize,
    /// Whether the last part is flagged.
    pub has_last_part: bool,
    /// Size of the part files in bytes.
    pub data_size: u64,
    /// Tables of the sanitized schema.
    pub tables: Vec<TableStats>,
    /// Part details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<PartStats>>,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Qualified table name.
    pub name: String,
    /// Number of columns.
    pub columns: usize,
    /// Rows of this table across parts.
    pub rows_count: u64,
}

/// Statistics for a single part.
#[derive(Debug, Serialize)]
pub struct PartStats {
    /// Part index.
    pub index: u32,
    /// Part file name.
    pub file_name: String,
    /// Whether this is the last part.
    pub is_last: bool,
    /// Rows in the part.
    pub rows_count: u64,
    /// File size in bytes, if the file exists.
    pub size: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_parts: bool, format: &str) -> CliResult<()> {
    let result = inspect(path, show_parts)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Collects statistics for the batch in `path`.
pub fn inspect(path: &Path, show_parts: bool) -> CliResult<InspectResult> {
    if !path.join(SUMMARY_FILE).exists() {
        return Err(CliError::NoBatch(path.to_path_buf()));
    }
    let batch = BatchInfo::load_summary(path)?;

    let parts: Vec<PartStats> = batch
        .parts_in_order()
        .map(|p| PartStats {
            index: p.index,
            file_name: p.file_name.clone(),
            is_last: p.is_last,
            rows_count: p.rows_count(),
            size: fs::metadata(path.join(&p.file_name)).ok().map(|m| m.len()),
        })
        .collect();

    let tables = batch
        .sanitized_schema
        .tables()
        .iter()
        .map(|t| {
            let key = t.key();
            let rows_count = batch
                .parts
                .iter()
                .flat_map(|p| &p.tables)
                .filter(|info| info.table.matches(&key, batch.sanitized_schema.comparison))
                .map(|info| info.rows_count)
                .sum();
            TableStats {
                name: key.to_string(),
                columns: t.columns().len(),
                rows_count,
            }
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        format: batch.format.to_string(),
        timestamp: batch.timestamp,
        rows_count: batch.rows_count,
        part_count: parts.len(),
        has_last_part: batch.parts.iter().any(|p| p.is_last),
        data_size: parts.iter().filter_map(|p| p.size).sum(),
        tables,
        parts: show_parts.then_some(parts),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("rowsync Batch Inspection");
    println!("========================");
    println!();
    println!("Path:      {}", result.path);
    println!("Format:    {}", result.format);
    println!("Timestamp: {}", result.timestamp);
    println!();
    println!("Parts:");
    println!("  Count:      {}", result.part_count);
    println!("  Last part:  {}", if result.has_last_part { "yes" } else { "no" });
    println!("  Data size:  {}", format_size(result.data_size));
    println!("  Total rows: {}", result.rows_count);
    println!();
    println!("Tables:");
    for table in &result.tables {
        println!(
            "  {} ({} columns): {} rows",
            table.name, table.columns, table.rows_count
        );
    }

    if let Some(parts) = &result.parts {
        println!();
        println!("Part details:");
        for part in parts {
            let size = part
                .size
                .map_or_else(|| "missing".to_string(), format_size);
            println!(
                "  [{}] {} {} rows, {}{}",
                part.index,
                part.file_name,
                part.rows_count,
                size,
                if part.is_last { " (last)" } else { "" }
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_batch;

    #[test]
    fn reports_parts_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let batch_dir = write_batch(dir.path(), 5);

        let result = inspect(&batch_dir, true).unwrap();
        assert_eq!(result.rows_count, 5);
        assert_eq!(result.part_count, 3);
        assert!(result.has_last_part);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].rows_count, 5);
        let parts = result.parts.unwrap();
        assert!(parts.iter().all(|p| p.size.is_some()));
        assert!(parts.last().unwrap().is_last);
    }

    #[test]
    fn missing_summary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            inspect(dir.path(), false),
            Err(CliError::NoBatch(_))
        ));
    }
}
