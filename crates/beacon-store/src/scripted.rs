//! A store that replays a fixed sequence of pages

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use beacon_common::{Error, Result};

use crate::query::{Page, QueryContext, StoreQuery, TelemetryStore};

/// Serves queued pages in order, then empty pages.
///
/// Every received query is recorded so callers can assert on the limits
/// and cursors they were sent.
#[derive(Default)]
pub struct ScriptedStore {
    pages: Mutex<VecDeque<Result<Page>>>,
    calls: Mutex<Vec<StoreQuery>>,
    delay: Option<Duration>,
}

impl ScriptedStore {
    pub fn new(pages: impl IntoIterator<Item = Result<Page>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Hold every query for `delay` before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, page: Result<Page>) {
        self.pages.lock().push_back(page);
    }

    pub fn calls(&self) -> Vec<StoreQuery> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TelemetryStore for ScriptedStore {
    async fn query(&self, ctx: &QueryContext, query: &StoreQuery) -> Result<Page> {
        self.calls.lock().push(query.clone());

        if let Some(delay) = self.delay {
            tokio::select! {
                () = ctx.cancel_token().cancelled() => {
                    return Err(Error::Cancelled("query cancelled".into()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
        ctx.check()?;

        let next = self.pages.lock().pop_front();
        next.unwrap_or_else(|| Ok(Page::empty()))
    }
}
