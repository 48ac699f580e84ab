pub mod service;
pub mod validation;

pub use service::{IngestReport, IngestionError, IngestionService};
pub use validation::{parse_timestamp, SkippedRow, SyncWindow, MAX_AMOUNT};
