//! One end-to-end export: extract, write CSV, publish.

use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::AppError;
use crate::export::csv_writer;
use crate::export::paginator::{ExtractOptions, PaginatedExporter, StopReason};
use crate::export::record::RecordSet;
use crate::gcs::{PublishTarget, UploadResult};

/// What to export and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub object_name: String,
    pub bucket: String,
}

#[derive(Debug)]
pub struct ExportOutcome {
    /// Bucket object name, e.g. `opportunityhistory.csv`.
    pub file_name: String,
    pub records: usize,
    pub expected_total: u64,
    pub stop_reason: StopReason,
    pub upload: UploadResult,
}

/// Bucket object name for a source object.
pub fn object_file_name(object_name: &str) -> String {
    format!("{}.csv", object_name.to_lowercase())
}

/// Runs the whole export for one object.
///
/// Exports of the same object within this process run one at a time.
///
/// # Errors
///
/// - `AppError::Extraction` - Login, count, or page retrieval failed
/// - `AppError::SchemaMismatch` / `AppError::Io` - CSV could not be written
/// - `AppError::Config` / `AppError::Publish` - Storage credentials or upload
pub async fn run_export(ctx: &AppContext, request: &ExportRequest) -> Result<ExportOutcome, AppError> {
    let lease = ctx.object_lock(&request.object_name);
    let _guard = lease.lock().await;

    let export_config = &ctx.config().export;
    let file_name = object_file_name(&request.object_name);

    info!(
        "[EXPORT] Starting {} -> {}/{}",
        request.object_name, request.bucket, file_name
    );

    let source = ctx.salesforce_source();
    let extraction = PaginatedExporter::new(
        &source,
        ExtractOptions {
            object_name: request.object_name.clone(),
            sort_field: export_config.sort_field.clone(),
            page_size: export_config.page_size,
            dedup_field: export_config.dedup_field.clone(),
        },
    )
    .extract()
    .await?;

    let expected_total = extraction.expected_total;
    let stop_reason = extraction.stop_reason;
    let records = extraction.records;
    let record_count = records.len();

    let local_path = export_config
        .tmp_dir
        .join(format!("{}-{}", Uuid::new_v4(), file_name));

    let result = write_and_publish(ctx, request, &file_name, &local_path, records).await;
    remove_temp_file(&local_path).await;
    let upload = result?;

    info!(
        "[EXPORT] Finished {}: {} of {} records published as {}",
        request.object_name, record_count, expected_total, file_name
    );

    Ok(ExportOutcome {
        file_name,
        records: record_count,
        expected_total,
        stop_reason,
        upload,
    })
}

async fn write_and_publish(
    ctx: &AppContext,
    request: &ExportRequest,
    file_name: &str,
    local_path: &Path,
    records: RecordSet,
) -> Result<UploadResult, AppError> {
    let csv_path = local_path.to_path_buf();
    tokio::task::spawn_blocking(move || csv_writer::write_file(&csv_path, &records))
        .await
        .map_err(|e| AppError::Internal(format!("CSV writer task failed: {}", e)))??;

    let publisher = ctx.publisher().await?;
    publisher
        .ensure_replaced(&PublishTarget::new(request.bucket.as_str(), file_name), local_path)
        .await
}

/// Best-effort removal; a leftover temp file does not fail the export.
async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("[EXPORT] Could not remove temp file {}: {}", path.display(), e),
    }
}
