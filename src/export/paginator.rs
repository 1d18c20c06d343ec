//! Cursor-based full extraction of one object.
//!
//! Pages are requested strictly one after another. Each page after the first
//! is filtered by `sort_field >= <sort value of the last accumulated record>`,
//! so records sharing a sort value across a page boundary are never skipped.
//! The boundary record itself comes back again; it is dropped when an
//! identity field is configured.
//!
//! The loop ends when the accumulated count reaches the total reported by
//! `count()` at the start, when a page comes back empty, or when a page adds
//! nothing new. The last two cases return a short record set and are logged;
//! they happen when records are deleted mid-export or when more records share
//! one sort value than fit in a page.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::AppError;
use crate::export::record::{FieldValue, Record, RecordSet};
use crate::export::source::RemoteDataSource;
use crate::salesforce::soql::PageQuery;

/// Parameters of one extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub object_name: String,
    pub sort_field: String,
    pub page_size: u32,
    /// Records whose value for this field was already accumulated are skipped.
    /// `None` keeps boundary duplicates.
    pub dedup_field: Option<String>,
}

/// Why the page loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Accumulated count reached the expected total.
    Complete,
    /// A page returned no records.
    Exhausted,
    /// A page returned only records already accumulated.
    Stalled,
}

/// Result of a full extraction.
#[derive(Debug)]
pub struct Extraction {
    pub records: RecordSet,
    /// Total reported by `count()` before the first page.
    pub expected_total: u64,
    /// Number of `query_page` calls issued.
    pub pages: u32,
    pub duplicates_skipped: usize,
    pub stop_reason: StopReason,
}

impl Extraction {
    /// True when fewer records than the reported total were retrieved.
    pub fn is_short(&self) -> bool {
        (self.records.len() as u64) < self.expected_total
    }
}

/// Drives the page loop over a [`RemoteDataSource`].
pub struct PaginatedExporter<'a, S: RemoteDataSource> {
    source: &'a S,
    options: ExtractOptions,
}

/// Append-only accumulator enforcing the total cap and de-duplication.
struct Accumulator<'o> {
    records: RecordSet,
    cap: usize,
    dedup_field: Option<&'o str>,
    seen: HashSet<String>,
    duplicates: usize,
}

impl<'o> Accumulator<'o> {
    fn new(cap: u64, dedup_field: Option<&'o str>) -> Self {
        Self {
            records: Vec::new(),
            cap: usize::try_from(cap).unwrap_or(usize::MAX),
            dedup_field,
            seen: HashSet::new(),
            duplicates: 0,
        }
    }

    /// Appends a page and returns how many records were actually added.
    fn append(&mut self, page: Vec<Record>) -> usize {
        let before = self.records.len();
        for record in page {
            if self.records.len() >= self.cap {
                break;
            }
            if let Some(key) = self.identity(&record) {
                if !self.seen.insert(key) {
                    self.duplicates += 1;
                    continue;
                }
            }
            self.records.push(record);
        }
        self.records.len() - before
    }

    fn identity(&self, record: &Record) -> Option<String> {
        let field = self.dedup_field?;
        match record.get_api_field(field) {
            None | Some(FieldValue::Null) => None,
            Some(value) => Some(value.to_string()),
        }
    }

    fn is_full(&self) -> bool {
        self.records.len() >= self.cap
    }
}

impl<'a, S: RemoteDataSource> PaginatedExporter<'a, S> {
    pub fn new(source: &'a S, options: ExtractOptions) -> Self {
        Self { source, options }
    }

    /// Retrieves every record of the object.
    ///
    /// # Errors
    ///
    /// Any failure while authenticating, counting, or fetching a page aborts
    /// the whole extraction and is returned as `AppError::Extraction`.
    pub async fn extract(&self) -> Result<Extraction, AppError> {
        self.run().await.map_err(AppError::extraction)
    }

    async fn run(&self) -> Result<Extraction, AppError> {
        let opts = &self.options;
        let session = self.source.authenticate().await?;

        let expected_total = self.source.count(&session, &opts.object_name).await?;
        info!(
            "[EXPORT] {}: {} records expected, page size {}",
            opts.object_name, expected_total, opts.page_size
        );

        let mut acc = Accumulator::new(expected_total, opts.dedup_field.as_deref());

        let first = PageQuery::first(opts.sort_field.as_str(), opts.page_size);
        let page = self
            .source
            .query_page(&session, &opts.object_name, &first)
            .await?;
        let mut pages: u32 = 1;

        let mut stop_reason = if page.is_empty() && expected_total > 0 {
            StopReason::Exhausted
        } else {
            acc.append(page);
            StopReason::Complete
        };

        while stop_reason == StopReason::Complete && !acc.is_full() {
            let cursor = self.cursor(&acc.records)?;
            let query = PageQuery::after(opts.sort_field.as_str(), cursor, opts.page_size);

            let page = self
                .source
                .query_page(&session, &opts.object_name, &query)
                .await?;
            pages += 1;

            if page.is_empty() {
                stop_reason = StopReason::Exhausted;
                break;
            }
            if acc.append(page) == 0 {
                stop_reason = StopReason::Stalled;
                break;
            }
        }

        let extraction = Extraction {
            expected_total,
            pages,
            duplicates_skipped: acc.duplicates,
            stop_reason,
            records: acc.records,
        };

        if extraction.is_short() {
            warn!(
                "[EXPORT] {}: stopped at {} of {} records ({:?} after {} pages)",
                opts.object_name,
                extraction.records.len(),
                expected_total,
                stop_reason,
                pages
            );
        } else {
            info!(
                "[EXPORT] {}: {} records in {} pages, {} boundary duplicates skipped",
                opts.object_name,
                extraction.records.len(),
                pages,
                extraction.duplicates_skipped
            );
        }

        Ok(extraction)
    }

    /// Sort value of the last accumulated record.
    fn cursor(&self, records: &[Record]) -> Result<FieldValue, AppError> {
        let sort_field = &self.options.sort_field;
        let last = records
            .last()
            .ok_or_else(|| AppError::Internal("no record to take a cursor from".into()))?;

        match last.get_api_field(sort_field) {
            Some(FieldValue::Null) | None => Err(AppError::Salesforce(format!(
                "record has no value for sort field {}",
                sort_field
            ))),
            Some(value) => Ok(value.clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
