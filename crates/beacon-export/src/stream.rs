//! Consumer side of an export: rows in, body chunks out

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use beacon_common::metrics;
use beacon_common::Error;

use crate::request::ExportFormat;
use crate::session::ExportSession;
use crate::writer::RowEncoder;

/// Name of the completeness trailer
pub const COMPLETE_TRAILER: &str = "X-Response-Complete";

/// How an export ended
#[derive(Debug)]
pub struct ExportOutcome {
    /// True only when the producer ran out of rows or hit the row limit
    pub complete: bool,
    pub rows: u64,
    pub bytes: u64,
    pub error: Option<Error>,
}

/// Pulls rows from a session and encodes them into body chunks
pub struct ExportStream {
    session: ExportSession,
    encoder: RowEncoder,
    format: ExportFormat,
    max_bytes: u64,
    rows: u64,
    bytes_written: u64,
    outcome: Option<ExportOutcome>,
}

impl ExportStream {
    pub fn new(session: ExportSession, format: ExportFormat, max_bytes: u64) -> Self {
        Self {
            session,
            encoder: RowEncoder::new(format),
            format,
            max_bytes,
            rows: 0,
            bytes_written: 0,
            outcome: None,
        }
    }

    /// Next chunk of body bytes, `None` once the export has ended
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.outcome.is_some() {
            return None;
        }

        let Some(row) = self.session.next_row().await else {
            let error = self.session.take_error();
            let complete = error.is_none() && !self.session.is_cancelled();
            self.finish(complete, error);
            return None;
        };

        match self.encoder.encode(&row) {
            Ok(chunk) => {
                self.rows += 1;
                self.bytes_written += chunk.len() as u64;
                if self.encoder.total_bytes() > self.max_bytes {
                    info!(
                        limit = self.max_bytes,
                        rows = self.rows,
                        "export reached byte limit"
                    );
                    self.finish(false, None);
                }
                Some(chunk)
            }
            Err(e) => {
                self.finish(false, Some(e));
                None
            }
        }
    }

    /// Set once `next_chunk` has returned `None`
    pub fn outcome(&self) -> Option<&ExportOutcome> {
        self.outcome.as_ref()
    }

    pub fn take_outcome(&mut self) -> Option<ExportOutcome> {
        self.outcome.take()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Collect the whole body; used where streaming is not needed
    pub async fn collect(mut self) -> (Vec<u8>, ExportOutcome) {
        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            body.extend_from_slice(&chunk);
        }
        let outcome = self.outcome.take().unwrap_or(ExportOutcome {
            complete: false,
            rows: self.rows,
            bytes: self.bytes_written,
            error: None,
        });
        (body, outcome)
    }

    fn finish(&mut self, complete: bool, error: Option<Error>) {
        // stop the producer; no more rows are read
        self.session.cancel();

        if let Some(e) = &error {
            warn!(error = %e, rows = self.rows, "export ended early");
        }
        metrics::record_export_session(self.format.as_str(), complete, self.rows, self.bytes_written);

        self.outcome = Some(ExportOutcome {
            complete,
            rows: self.rows,
            bytes: self.bytes_written,
            error,
        });
    }
}

/// `Content-Disposition` file name, stamped with the UTC start time
pub fn attachment_filename(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "data_exported_{}.{}",
        now.format("%Y-%m-%d_%H%M%S"),
        format.as_str()
    )
}

/// Headers written before the first body byte
pub fn response_headers(format: ExportFormat, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", format.content_type().to_string()),
        ("Cache-Control", "no-cache".to_string()),
        ("Vary", "Accept-Encoding".to_string()),
        (
            "Access-Control-Expose-Headers",
            format!("Content-Disposition, {}", COMPLETE_TRAILER),
        ),
        ("Trailer", COMPLETE_TRAILER.to_string()),
        ("Transfer-Encoding", "chunked".to_string()),
        (
            "Content-Disposition",
            format!(
                "attachment; filename=\"{}\"",
                attachment_filename(format, now)
            ),
        ),
    ]
}
