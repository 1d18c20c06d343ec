//! Record extraction, CSV rendering, and the end-to-end export pipeline.

pub mod csv_writer;
pub mod paginator;
pub mod pipeline;
pub mod record;
pub mod source;

pub use paginator::{ExtractOptions, Extraction, PaginatedExporter, StopReason};
pub use pipeline::{object_file_name, run_export, ExportOutcome, ExportRequest};
pub use record::{FieldValue, Record, RecordSet};
pub use source::RemoteDataSource;
