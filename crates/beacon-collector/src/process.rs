//! Collector running as a child process

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use beacon_common::config::SupervisorConfig;
use beacon_common::{Error, Result};

use crate::state::CollectorState;
use crate::{validate_config, Collector};

/// How to launch the collector executable
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub binary: PathBuf,
    /// Passed before `--config <path>`
    pub args: Vec<String>,
    pub config_path: PathBuf,
    /// A process that exits inside this window failed to start
    pub startup_grace: Duration,
    pub shutdown_timeout: Duration,
}

impl ProcessSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.collector_binary),
            args: config.collector_args.clone(),
            config_path: PathBuf::from(&config.collector_config_path),
            startup_grace: config.startup_grace(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

/// Spawns the collector binary with `--config <path>` and watches it
pub struct ProcessCollector {
    settings: ProcessSettings,
    state: Arc<watch::Sender<CollectorState>>,
    running: Mutex<Option<Running>>,
}

impl ProcessCollector {
    pub fn new(settings: ProcessSettings) -> Self {
        let (state, _) = watch::channel(CollectorState::Unknown);
        Self {
            settings,
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<CollectorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: CollectorState) {
        debug!(state = %state, "collector state");
        self.state.send_replace(state);
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(&self.settings.args)
            .arg("--config")
            .arg(&self.settings.config_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    async fn run(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            if self.state().is_running() {
                *running = Some(previous);
                return Err(Error::internal("collector is already running"));
            }
            // exited on its own; reap the monitor
            let _ = previous.monitor.await;
        }

        let config = tokio::fs::read(&self.settings.config_path).await?;
        if let Err(e) = validate_config(&config) {
            self.set_state(CollectorState::Closed);
            return Err(e);
        }

        self.set_state(CollectorState::Starting);
        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                self.set_state(CollectorState::Closed);
                return Err(Error::Internal(format!(
                    "failed to spawn collector {}: {}",
                    self.settings.binary.display(),
                    e
                )));
            }
        };

        match tokio::time::timeout(self.settings.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                self.set_state(CollectorState::Closed);
                return Err(Error::Internal(format!(
                    "collector exited during startup: {}",
                    status
                )));
            }
            Ok(Err(e)) => {
                self.set_state(CollectorState::Closed);
                return Err(e.into());
            }
            Err(_) => {}
        }

        info!(
            pid = child.id().unwrap_or_default(),
            config = %self.settings.config_path.display(),
            "collector running"
        );
        self.set_state(CollectorState::Running);

        let (stop, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            stop_rx,
            Arc::clone(&self.state),
            self.settings.shutdown_timeout,
        ));
        *running = Some(Running { stop, monitor });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        // the monitor is gone already if the process exited by itself
        let _ = running.stop.send(());
        running
            .monitor
            .await
            .map_err(|e| Error::Internal(format!("collector monitor failed: {}", e)))
    }

    fn state(&self) -> CollectorState {
        *self.state.borrow()
    }
}

async fn monitor(
    mut child: Child,
    stop: oneshot::Receiver<()>,
    state: Arc<watch::Sender<CollectorState>>,
    shutdown_timeout: Duration,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => warn!(%status, "collector exited"),
            Err(e) => error!(error = %e, "failed to wait for collector"),
        },
        _ = stop => {
            state.send_replace(CollectorState::Closing);
            terminate(&mut child);
            let status = match tokio::time::timeout(shutdown_timeout, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(timeout = ?shutdown_timeout, "collector did not stop in time, killing");
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill collector");
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => info!(%status, "collector stopped"),
                Err(e) => error!(error = %e, "failed to wait for collector"),
            }
        }
    }
    state.send_replace(CollectorState::Closed);
}

/// Ask the collector to exit with SIGTERM
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        // already reaped
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to send SIGTERM to collector");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to signal collector");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, script: &str) -> ProcessSettings {
        let config_path = dir.path().join("collector.yaml");
        std::fs::write(&config_path, "receivers: {}\n").unwrap();
        ProcessSettings {
            binary: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into(), "sh".into()],
            config_path,
            startup_grace: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let collector = ProcessCollector::new(settings(&dir, "sleep 30"));
        assert_eq!(collector.state(), CollectorState::Unknown);

        collector.run().await.unwrap();
        assert_eq!(collector.state(), CollectorState::Running);
        assert!(collector.run().await.is_err());

        collector.shutdown().await.unwrap();
        assert_eq!(collector.state(), CollectorState::Closed);

        collector.run().await.unwrap();
        assert_eq!(collector.state(), CollectorState::Running);
        collector.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sends_sigterm_first() {
        let dir = TempDir::new().unwrap();
        // $2 is the config path appended after `--config`
        let script = r#"trap 'echo term > "$2.stopped"; exit 0' TERM; while true; do sleep 0.05; done"#;
        let settings = settings(&dir, script);
        let marker = dir.path().join("collector.yaml.stopped");
        let collector = ProcessCollector::new(settings);

        collector.run().await.unwrap();
        collector.shutdown().await.unwrap();
        assert_eq!(collector.state(), CollectorState::Closed);
        assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "term");
    }

    #[tokio::test]
    async fn test_shutdown_kills_after_timeout() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, "trap '' TERM; while true; do sleep 0.05; done");
        settings.shutdown_timeout = Duration::from_millis(300);
        let collector = ProcessCollector::new(settings);

        collector.run().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), collector.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(collector.state(), CollectorState::Closed);
    }

    #[tokio::test]
    async fn test_early_exit_is_failed_start() {
        let dir = TempDir::new().unwrap();
        let collector = ProcessCollector::new(settings(&dir, "exit 3"));
        let err = collector.run().await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
        assert_eq!(collector.state(), CollectorState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_started() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, "sleep 30");
        std::fs::write(&settings.config_path, "receivers: [").unwrap();
        let collector = ProcessCollector::new(settings);
        let err = collector.run().await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(collector.state(), CollectorState::Closed);
    }

    #[tokio::test]
    async fn test_crash_is_observed() {
        let dir = TempDir::new().unwrap();
        let collector = ProcessCollector::new(settings(&dir, "sleep 0.5"));
        let mut states = collector.subscribe();
        collector.run().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while *states.borrow_and_update() != CollectorState::Closed {
                states.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        collector.shutdown().await.unwrap();
    }
}
