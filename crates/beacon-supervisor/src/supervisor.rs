//! The supervisor: one collector, kept on the server's config

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beacon_collector::{run_guarded, validate_config, Collector, CollectorState};
use beacon_common::config::SupervisorConfig;
use beacon_common::metrics::{self, LatencyTimer};

use crate::backoff::Backoff;
use crate::config_doc::{config_hash, ConfigDoc};
use crate::description::agent_description;
use crate::error::{Result, SupervisorError};
use crate::manager_config::ManagerConfig;
use crate::opamp::{
    capabilities, AgentConfigFile, AgentConfigMap, AgentDescription, AgentRemoteConfig,
    AgentToServer, ComponentHealth, EffectiveConfig, RemoteConfigStatus, RemoteConfigStatuses,
    ServerToAgent, FLAG_REPORT_FULL_STATE,
};
use crate::transport::{Transport, WsTransport};

/// Remote config key holding the collector document
pub const COLLECTOR_CONFIG_KEY: &str = "collector.yaml";
const CONFIG_CONTENT_TYPE: &str = "text/yaml";

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub collector_config_path: PathBuf,
    pub watchdog_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

impl SupervisorSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            collector_config_path: PathBuf::from(&config.collector_config_path),
            watchdog_interval: config.watchdog_interval(),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            service_version: config.service_version.clone(),
            capabilities: config.capabilities.clone(),
        }
    }
}

/// Result of handling one remote config
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Unchanged,
    Applied,
    Failed(String),
}

pub struct Supervisor {
    inner: Arc<Inner>,
    transport: Option<Arc<dyn Transport>>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    errors: Mutex<Option<mpsc::Receiver<SupervisorError>>>,
}

struct Inner {
    settings: SupervisorSettings,
    instance_uid: Vec<u8>,
    description: AgentDescription,
    collector: Arc<dyn Collector>,
    /// Held for the whole of an apply
    doc: tokio::sync::Mutex<ConfigDoc>,
    /// Bumped when an apply starts and again when it ends; odd while a
    /// restart is in flight
    reload_epoch: AtomicU64,
    stopping: AtomicBool,
    initial_received: AtomicBool,
    healthy: AtomicBool,
    sequence: AtomicU64,
    start_time_unix_nano: u64,
    last_status: Mutex<Option<RemoteConfigStatus>>,
    fatal: mpsc::Sender<SupervisorError>,
    fatal_sent: AtomicBool,
}

impl Supervisor {
    /// Build a supervisor from the service config.
    ///
    /// Loads the manager config and opens sessions over WebSocket when it
    /// names a server endpoint.
    pub async fn from_config(config: &SupervisorConfig, collector: Arc<dyn Collector>) -> Result<Self> {
        let manager = ManagerConfig::load_or_init(Path::new(&config.manager_config_path)).await?;
        let transport: Option<Arc<dyn Transport>> = manager.server_endpoint().map(|endpoint| {
            Arc::new(WsTransport::new(endpoint, manager.access_token.clone())) as Arc<dyn Transport>
        });
        Self::new(SupervisorSettings::from_config(config), &manager, collector, transport).await
    }

    /// Prepare the collector config and build the supervisor.
    ///
    /// `transport` is `None` in no-server mode.
    pub async fn new(
        settings: SupervisorSettings,
        manager: &ManagerConfig,
        collector: Arc<dyn Collector>,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self> {
        ConfigDoc::ensure_instance_id(&settings.collector_config_path).await?;
        let doc = ConfigDoc::load(settings.collector_config_path.clone()).await?;
        let (fatal, errors) = mpsc::channel(1);

        let inner = Inner {
            description: agent_description(&settings.service_version, &settings.capabilities),
            instance_uid: manager.instance_uid(),
            collector,
            doc: tokio::sync::Mutex::new(doc),
            reload_epoch: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            initial_received: AtomicBool::new(false),
            healthy: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            start_time_unix_nano: unix_nanos(),
            last_status: Mutex::new(None),
            fatal,
            fatal_sent: AtomicBool::new(false),
            settings,
        };

        Ok(Self {
            inner: Arc::new(inner),
            transport,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            errors: Mutex::new(Some(errors)),
        })
    }

    /// Start the collector.
    ///
    /// Without a server this runs the local config. With one, it returns
    /// after the first remote config has been handled and the collector
    /// is running.
    pub async fn start(&self, ctx: &CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::Config("supervisor already started".into()));
        }

        let Some(transport) = self.transport.clone() else {
            info!("no server endpoint configured, running local collector config");
            run_guarded(self.inner.collector.as_ref()).await?;
            self.inner.set_healthy(true);
            self.spawn_watchdog();
            return Ok(());
        };

        let (first_tx, first_rx) = oneshot::channel();
        let session = tokio::spawn(session_loop(
            Arc::clone(&self.inner),
            transport,
            self.cancel.clone(),
            Some(first_tx),
        ));
        self.tasks.lock().push(session);

        tokio::select! {
            _ = ctx.cancelled() => return Err(SupervisorError::Cancelled),
            _ = self.cancel.cancelled() => return Err(SupervisorError::Cancelled),
            first = first_rx => match first {
                Ok(result) => result?,
                Err(_) => {
                    return Err(SupervisorError::Session(
                        "session ended before the first remote config".into(),
                    ))
                }
            },
        }

        self.spawn_watchdog();
        info!("supervisor started");
        Ok(())
    }

    /// Close the session, stop the collector, and join background tasks
    pub async fn stop(&self) -> Result<()> {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let mut failures = Vec::new();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    failures.push(format!("supervisor task panicked: {}", e));
                }
            }
        }

        // waits out an apply that is still running
        let _doc = self.inner.doc.lock().await;
        if let Err(e) = self.inner.collector.shutdown().await {
            failures.push(e.to_string());
        }
        self.inner.set_healthy(false);
        info!("supervisor stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::Stop(failures))
        }
    }

    /// The fatal error channel. Yields at most one error; only the first
    /// call gets the receiver.
    pub fn errors(&self) -> Option<mpsc::Receiver<SupervisorError>> {
        self.errors.lock().take()
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst)
    }

    pub fn collector_state(&self) -> CollectorState {
        self.inner.collector.state()
    }

    pub async fn current_hash(&self) -> Vec<u8> {
        self.inner.doc.lock().await.current_hash().to_vec()
    }

    pub fn last_status(&self) -> Option<RemoteConfigStatus> {
        self.inner.last_status.lock().clone()
    }

    fn spawn_watchdog(&self) {
        let task = tokio::spawn(watchdog(Arc::clone(&self.inner), self.cancel.clone()));
        self.tasks.lock().push(task);
    }
}

impl Inner {
    fn message(&self) -> AgentToServer {
        AgentToServer {
            instance_uid: self.instance_uid.clone(),
            sequence_num: self.sequence.fetch_add(1, Ordering::SeqCst),
            capabilities: capabilities::SUPERVISOR,
            ..Default::default()
        }
    }

    fn health(&self) -> ComponentHealth {
        let healthy = self.healthy.load(Ordering::SeqCst);
        ComponentHealth {
            healthy,
            start_time_unix_nano: self.start_time_unix_nano,
            last_error: if healthy {
                String::new()
            } else {
                "collector not running".to_string()
            },
            status: self.collector.state().as_str().to_string(),
            status_time_unix_nano: unix_nanos(),
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
        metrics::set_collector_healthy(healthy);
    }

    fn emit_fatal(&self, err: SupervisorError) {
        if self.fatal_sent.swap(true, Ordering::SeqCst) {
            debug!(error = %err, "fatal error already reported");
            return;
        }
        error!(error = %err, "supervisor fatal error");
        let _ = self.fatal.try_send(err);
    }

    /// Description, health, effective config and last apply status
    async fn full_state(&self) -> Result<AgentToServer> {
        let body = self.doc.lock().await.read().await?;
        let mut msg = self.message();
        msg.agent_description = Some(self.description.clone());
        msg.health = Some(self.health());
        msg.effective_config = Some(effective_config(body));
        msg.remote_config_status = self.last_status.lock().clone();
        Ok(msg)
    }

    async fn handle_message(
        &self,
        msg: ServerToAgent,
        outbound: &mpsc::Sender<AgentToServer>,
        first: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        if let Some(err) = &msg.error_response {
            warn!(error_type = err.r#type, message = %err.error_message, "server reported an error");
        }

        if let Some(remote) = &msg.remote_config {
            let outcome = self.apply_remote_config(remote, outbound).await?;
            debug!(?outcome, "remote config handled");

            if let Some(first) = first.take() {
                if !self.collector.state().is_running() {
                    info!("starting collector on the local config");
                    run_guarded(self.collector.as_ref()).await?;
                }
                self.set_healthy(true);
                let mut health = self.message();
                health.health = Some(self.health());
                let _ = outbound.send(health).await;
                let _ = first.send(Ok(()));
            }
        }

        if msg.flags & FLAG_REPORT_FULL_STATE != 0 {
            let _ = outbound.send(self.full_state().await?).await;
        }
        Ok(())
    }

    /// Apply a remote config and report the outcome to the server.
    ///
    /// Only file I/O failures are returned as errors.
    async fn apply_remote_config(
        &self,
        remote: &AgentRemoteConfig,
        outbound: &mpsc::Sender<AgentToServer>,
    ) -> Result<ApplyOutcome> {
        let Some(file) = remote
            .config
            .as_ref()
            .and_then(|config| config.config_map.get(COLLECTOR_CONFIG_KEY))
        else {
            debug!("remote config has no collector document");
            return Ok(ApplyOutcome::Unchanged);
        };

        let new_hash = config_hash(&file.body);
        let mut doc = self.doc.lock().await;
        let initial_received = self.initial_received.swap(true, Ordering::SeqCst);
        if initial_received && new_hash.as_slice() == doc.current_hash() {
            debug!("remote config unchanged");
            return Ok(ApplyOutcome::Unchanged);
        }

        let timer = LatencyTimer::new();
        self.reload_epoch.fetch_add(1, Ordering::SeqCst);
        let outcome = self.apply_locked(&mut doc, &file.body, new_hash).await;
        self.reload_epoch.fetch_add(1, Ordering::SeqCst);
        let outcome = outcome?;

        let mut status = RemoteConfigStatus {
            last_remote_config_hash: remote.config_hash.clone(),
            ..Default::default()
        };
        let mut report = self.message();
        match &outcome {
            ApplyOutcome::Failed(message) => {
                status.set_status(RemoteConfigStatuses::Failed);
                status.error_message = message.clone();
            }
            _ => {
                status.set_status(RemoteConfigStatuses::Applied);
                report.effective_config = Some(effective_config(file.body.clone()));
            }
        }
        metrics::record_config_apply(status.status().as_str(), timer.elapsed_ms());

        *self.last_status.lock() = Some(status.clone());
        report.remote_config_status = Some(status);
        let _ = outbound.send(report).await;
        Ok(outcome)
    }

    async fn apply_locked(&self, doc: &mut ConfigDoc, body: &[u8], new_hash: Vec<u8>) -> Result<ApplyOutcome> {
        if let Err(e) = validate_config(body) {
            warn!(error = %e, "rejecting remote config");
            return Ok(ApplyOutcome::Failed(e.to_string()));
        }

        doc.backup().await?;
        doc.write(body).await?;

        match self.restart().await {
            Ok(()) => {
                let hash = hex::encode(&new_hash);
                doc.set_current_hash(new_hash);
                doc.remove_backup().await?;
                info!(path = %doc.path().display(), hash = %hash, "remote config applied");
                Ok(ApplyOutcome::Applied)
            }
            Err(e) => {
                warn!(error = %e, "collector failed on new config, rolling back");
                doc.restore().await?;
                if let Err(again) = self.restart().await {
                    error!(error = %again, "collector failed to restart on previous config");
                }
                doc.remove_backup().await?;
                Ok(ApplyOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn restart(&self) -> beacon_common::Result<()> {
        self.collector.shutdown().await?;
        run_guarded(self.collector.as_ref()).await
    }
}

fn effective_config(body: Vec<u8>) -> EffectiveConfig {
    let mut files = HashMap::new();
    files.insert(
        COLLECTOR_CONFIG_KEY.to_string(),
        AgentConfigFile {
            body,
            content_type: CONFIG_CONTENT_TYPE.to_string(),
        },
    );
    EffectiveConfig {
        config_map: Some(AgentConfigMap { config_map: files }),
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

async fn session_loop(
    inner: Arc<Inner>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    mut first: Option<oneshot::Sender<Result<()>>>,
) {
    let mut backoff = Backoff::new(inner.settings.backoff_initial, inner.settings.backoff_max);
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            link = transport.connect() => link,
        };

        match connected {
            Ok(mut link) => {
                backoff.reset();
                let hello = match inner.full_state().await {
                    Ok(msg) => msg,
                    Err(e) => {
                        fail(&inner, &mut first, e);
                        return;
                    }
                };
                if link.outbound.send(hello).await.is_ok() {
                    loop {
                        let msg = tokio::select! {
                            _ = cancel.cancelled() => return,
                            msg = link.inbound.recv() => msg,
                        };
                        let Some(msg) = msg else { break };
                        if let Err(e) = inner.handle_message(msg, &link.outbound, &mut first).await {
                            fail(&inner, &mut first, e);
                            return;
                        }
                    }
                }
                warn!("opamp session lost");
            }
            Err(e) => warn!(error = %e, "opamp connect failed"),
        }

        metrics::record_reconnect();
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn fail(inner: &Inner, first: &mut Option<oneshot::Sender<Result<()>>>, err: SupervisorError) {
    match first.take() {
        Some(first) => {
            let _ = first.send(Err(err));
        }
        None => inner.emit_fatal(err),
    }
}

async fn watchdog(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.settings.watchdog_interval.max(Duration::from_millis(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if !collector_stopped(&inner) {
            continue;
        }
        inner.set_healthy(false);
        inner.emit_fatal(SupervisorError::CollectorStopped);
        return;
    }
}

/// True when the collector is `Closed` and no apply or stop touched it
/// while the state was read
fn collector_stopped(inner: &Inner) -> bool {
    let epoch = inner.reload_epoch.load(Ordering::SeqCst);
    if epoch % 2 == 1 || inner.stopping.load(Ordering::SeqCst) {
        return false;
    }
    inner.collector.state() == CollectorState::Closed
        && inner.reload_epoch.load(Ordering::SeqCst) == epoch
        && !inner.stopping.load(Ordering::SeqCst)
}
