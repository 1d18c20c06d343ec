//! CSV rendering of a record set.
//!
//! The header is the first record's field order. Later records that lack a
//! header field get an empty cell; a later record with a field the header does
//! not know is rejected with `AppError::SchemaMismatch`. An empty record set
//! renders as empty output, without a header.
//!
//! Files are written through [`AtomicCsvWriter`]: a temporary file in the
//! destination directory that replaces the destination on `finish()` and is
//! removed if dropped before then.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;
use crate::export::record::Record;

// ─────────────────────────────────────────────────────────────────────────────
// Serialization
// ─────────────────────────────────────────────────────────────────────────────

/// Writes header and rows for `records` into a CSV writer.
///
/// Returns the number of data rows written.
pub fn write_records<W: Write>(writer: &mut Writer<W>, records: &[Record]) -> Result<usize, AppError> {
    let Some(first) = records.first() else {
        return Ok(0);
    };
    let header: Vec<&str> = first.field_names().collect();

    writer
        .write_record(&header)
        .map_err(|e| AppError::Io(format!("Failed to write CSV header: {}", e)))?;

    for (index, record) in records.iter().enumerate() {
        if let Some(extra) = record.field_names().find(|name| !header.contains(name)) {
            return Err(AppError::SchemaMismatch {
                field: extra.to_string(),
                row: index + 1,
            });
        }

        let row = header
            .iter()
            .map(|name| record.get(name).map(|v| v.to_string()).unwrap_or_default());
        writer
            .write_record(row)
            .map_err(|e| AppError::Io(format!("Failed to write CSV row {}: {}", index + 1, e)))?;
    }

    Ok(records.len())
}

/// Renders `records` as CSV text.
pub fn serialize(records: &[Record]) -> Result<String, AppError> {
    let mut writer = Writer::from_writer(Vec::new());
    write_records(&mut writer, records)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Io(format!("Failed to flush CSV writer: {}", e.error())))?;
    String::from_utf8(bytes).map_err(|_| AppError::Internal("CSV output is not UTF-8".into()))
}

/// Writes `records` to `path`, replacing any existing file atomically.
pub fn write_file(path: impl AsRef<Path>, records: &[Record]) -> Result<PathBuf, AppError> {
    let mut writer = AtomicCsvWriter::new(path)?;
    write_records(writer.writer_mut(), records)?;
    writer.finish()
}

// ─────────────────────────────────────────────────────────────────────────────
// AtomicCsvWriter
// ─────────────────────────────────────────────────────────────────────────────

/// A CSV writer that only ever exposes complete files at its target path.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Creates a writer targeting `final_path`.
    ///
    /// The temporary file lives in the same directory so the final rename
    /// stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the parent directory cannot be determined or
    /// the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| final_path.file_name().map(|_| PathBuf::from(".")))
            .ok_or_else(|| {
                AppError::Io(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                ))
            })?;

        let temp_file = NamedTempFile::new_in(&parent_dir)
            .map_err(|e| AppError::Io(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self {
            writer: Writer::from_writer(BufWriter::new(temp_file)),
            final_path,
        })
    }

    pub fn writer_mut(&mut self) -> &mut Writer<BufWriter<NamedTempFile>> {
        &mut self.writer
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if flushing or persisting fails. The temporary
    /// file is cleaned up on error.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let buf_writer = self
            .writer
            .into_inner()
            .map_err(|e| AppError::Io(format!("Failed to flush CSV writer: {}", e.error())))?;

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| AppError::Io(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}
