//! Verify command implementation.

use super::{CliError, CliResult};
use rowsync_core::batch::SUMMARY_FILE;
use rowsync_core::BatchInfo;
use std::path::Path;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of parts checked.
    pub parts_checked: usize,
    /// Number of parts that loaded and fit the schema.
    pub valid_parts: usize,
    /// Number of parts that failed.
    pub corrupt_parts: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_parts == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying batch at {:?}", path);
    println!();

    let result = verify(path)?;
    println!(
        "  Parts checked: {}, valid: {}, corrupt: {}",
        result.parts_checked, result.valid_parts, result.corrupt_parts
    );
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Batch verification passed");
        Ok(())
    } else {
        println!("✗ Batch verification failed");
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Checks the batch in `path`: the last-part invariant, then every part's
/// payload against the sanitized schema and the recorded row counts.
pub fn verify(path: &Path) -> CliResult<VerifyResult> {
    if !path.join(SUMMARY_FILE).exists() {
        return Err(CliError::NoBatch(path.to_path_buf()));
    }
    let batch = BatchInfo::load_summary(path)?;
    let mut result = VerifyResult::default();

    if let Err(e) = batch.check_last_batch() {
        result.errors.push(e.to_string());
    }

    for part in batch.parts_in_order() {
        result.parts_checked += 1;
        let container = match batch.load_part(part.index) {
            Ok(container) => container,
            Err(e) => {
                result.corrupt_parts += 1;
                result.errors.push(e.to_string());
                continue;
            }
        };
        if let Err(e) = container.validate(&batch.sanitized_schema) {
            result.corrupt_parts += 1;
            result.errors.push(format!("part {}: {e}", part.index));
            continue;
        }
        let rows = container.rows_count() as u64;
        if rows != part.rows_count() {
            result.corrupt_parts += 1;
            result.errors.push(format!(
                "part {}: {} rows recorded, {} found",
                part.index,
                part.rows_count(),
                rows
            ));
            continue;
        }
        debug!(index = part.index, rows, "part verified");
        result.valid_parts += 1;
    }

    let total: u64 = batch.parts.iter().map(|p| p.rows_count()).sum();
    if total != batch.rows_count {
        result.errors.push(format!(
            "batch records {} rows, parts hold {}",
            batch.rows_count, total
        ));
    }

    Ok(result)
}
