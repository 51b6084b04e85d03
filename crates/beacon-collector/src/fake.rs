//! In-process collector used by supervisor tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use beacon_common::{Error, Result};

use crate::state::CollectorState;
use crate::{validate_config, Collector};

/// Pretends to run a collector.
///
/// A start succeeds when the config file parses as a YAML mapping. The
/// bytes it started with are kept so tests can see which config is live.
pub struct FakeCollector {
    config_path: PathBuf,
    state: Mutex<CollectorState>,
    running_config: Mutex<Option<Vec<u8>>>,
    starts: AtomicUsize,
    fail_next: AtomicBool,
    panic_next: AtomicBool,
}

impl FakeCollector {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            state: Mutex::new(CollectorState::Unknown),
            running_config: Mutex::new(None),
            starts: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
        }
    }

    /// Number of successful starts
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn running_config(&self) -> Option<Vec<u8>> {
        self.running_config.lock().clone()
    }

    pub fn fail_next_start(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_next_start(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Simulate the collector dying on its own
    pub fn crash(&self) {
        *self.state.lock() = CollectorState::Closed;
        *self.running_config.lock() = None;
    }
}

#[async_trait]
impl Collector for FakeCollector {
    async fn run(&self) -> Result<()> {
        if self.state().is_running() {
            return Err(Error::internal("collector is already running"));
        }
        *self.state.lock() = CollectorState::Starting;

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("collector start blew up");
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            *self.state.lock() = CollectorState::Closed;
            return Err(Error::internal("collector refused to start"));
        }

        let config = tokio::fs::read(&self.config_path).await?;
        if let Err(e) = validate_config(&config) {
            *self.state.lock() = CollectorState::Closed;
            return Err(e);
        }

        *self.running_config.lock() = Some(config);
        *self.state.lock() = CollectorState::Running;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        *self.state.lock() = CollectorState::Closing;
        *self.running_config.lock() = None;
        *self.state.lock() = CollectorState::Closed;
        Ok(())
    }

    fn state(&self) -> CollectorState {
        *self.state.lock()
    }
}
