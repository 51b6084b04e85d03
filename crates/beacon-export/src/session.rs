//! Export producer
//!
//! One producer task per export reads the store in chunks and feeds rows
//! into a bounded channel. The consumer owns the [`ExportSession`]; dropping
//! it cancels the producer.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use beacon_common::config::ExportConfig;
use beacon_common::metrics::{self, LatencyTimer};
use beacon_common::{Error, OrgId, RawRow, Result};
use beacon_store::{Cursor, QueryContext, TelemetryStore};

use crate::request::ExportRequest;

/// Starts export sessions against one store
#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn TelemetryStore>,
    config: ExportConfig,
}

impl Exporter {
    pub fn new(store: Arc<dyn TelemetryStore>, config: ExportConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Start producing rows for `request`.
    ///
    /// The producer stops when the row limit is reached, the store returns
    /// an empty page, `cancel` fires, the session is dropped, or a store
    /// call fails. Only the last of these puts a value on the error channel.
    pub fn export(
        &self,
        cancel: &CancellationToken,
        org_id: impl Into<OrgId>,
        request: ExportRequest,
    ) -> ExportSession {
        let token = cancel.child_token();
        let (rows_tx, rows_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (err_tx, err_rx) = oneshot::channel();

        let producer = Producer {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            org_id: org_id.into(),
            request,
            cancel: token.clone(),
            rows: rows_tx,
        };
        let handle = tokio::spawn(producer.run(err_tx));

        ExportSession {
            rows: rows_rx,
            errs: err_rx,
            cancel: token.clone(),
            _guard: token.drop_guard(),
            producer: handle,
            rows_received: 0,
        }
    }
}

/// The consumer side of one export
pub struct ExportSession {
    rows: mpsc::Receiver<RawRow>,
    errs: oneshot::Receiver<Error>,
    cancel: CancellationToken,
    _guard: DropGuard,
    producer: JoinHandle<()>,
    rows_received: u64,
}

impl ExportSession {
    /// Next row, or `None` once the producer has finished
    pub async fn next_row(&mut self) -> Option<RawRow> {
        let row = self.rows.recv().await;
        if row.is_some() {
            self.rows_received += 1;
        }
        row
    }

    /// The producer's failure, if any. Meaningful once `next_row` is `None`.
    pub fn take_error(&mut self) -> Option<Error> {
        self.errs.try_recv().ok()
    }

    /// Tell the producer the consumer is done
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn rows_received(&self) -> u64 {
        self.rows_received
    }

    /// Cancel and wait for the producer to exit
    pub async fn close(self) {
        self.cancel.cancel();
        let ExportSession { producer, .. } = self;
        if let Err(e) = producer.await {
            warn!(error = %e, "export producer task failed");
        }
    }
}

struct Producer {
    store: Arc<dyn TelemetryStore>,
    config: ExportConfig,
    org_id: OrgId,
    request: ExportRequest,
    cancel: CancellationToken,
    rows: mpsc::Sender<RawRow>,
}

impl Producer {
    async fn run(self, errs: oneshot::Sender<Error>) {
        match self.produce().await {
            Ok(sent) => debug!(org_id = %self.org_id, rows = sent, "export producer finished"),
            Err(e) if e.is_cancelled() => {
                debug!(org_id = %self.org_id, "export producer cancelled");
            }
            Err(e) => {
                warn!(org_id = %self.org_id, error = %e, "export producer failed");
                metrics::record_export_error(e.kind().as_str());
                let _ = errs.send(e);
            }
        }
        // dropping self closes the row channel after the error is in place
    }

    async fn produce(&self) -> Result<u64> {
        let chunk = self.config.chunk_size.max(1);
        let timeout = self.config.query_timeout();
        let signal = self.request.signal.as_str();

        let mut remaining = self.request.limit;
        let mut cursor = Cursor::start();
        let mut sent = 0u64;

        while remaining > 0 {
            let batch = chunk.min(remaining);
            let query = self.request.store_query(&self.org_id, batch, cursor);
            let ctx = QueryContext::new(timeout, self.config.max_threads, self.cancel.child_token());

            let timer = LatencyTimer::new();
            let page = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(cancelled()),
                result = tokio::time::timeout(timeout, self.store.query(&ctx, &query)) => match result {
                    Ok(page) => page?,
                    Err(_) => {
                        return Err(Error::Timeout(format!(
                            "store query exceeded {}s",
                            timeout.as_secs()
                        )))
                    }
                },
            };
            metrics::record_store_page(signal, page.rows.len(), timer.elapsed_ms());

            if page.rows.is_empty() {
                break;
            }

            let received = page.rows.len();
            for row in page.rows.into_iter().take(batch) {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(cancelled()),
                    result = self.rows.send(row) => {
                        if result.is_err() {
                            return Err(cancelled());
                        }
                    }
                }
                sent += 1;
            }

            if received > batch {
                debug!(
                    requested = batch,
                    received, "store returned an oversized page, truncating"
                );
                break;
            }
            remaining -= received;
            cursor = page.next_cursor;
        }
        Ok(sent)
    }
}

fn cancelled() -> Error {
    Error::Cancelled("export cancelled".into())
}
