//! Beacon raw data export
//!
//! Incremental, cursor-paginated export of logs and traces:
//!
//! - [`request`]: GET/POST request parsing with limit, column and order defaults
//! - [`session`]: the producer that pages through a [`beacon_store::TelemetryStore`]
//! - [`writer`]: CSV and JSONL row encoders with byte accounting
//! - [`stream`]: the consumer that turns rows into body chunks and decides completeness

pub mod request;
pub mod session;
pub mod stream;
pub mod writer;

pub use request::{ExportFormat, ExportRequest, QueryRangeRequest};
pub use session::{ExportSession, Exporter};
pub use stream::{attachment_filename, response_headers, ExportOutcome, ExportStream, COMPLETE_TRAILER};
pub use writer::{cell_text, sanitize_cell, RowEncoder};
