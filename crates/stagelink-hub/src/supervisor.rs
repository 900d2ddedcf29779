//! Plugin Supervisor
//!
//! Configuration-driven lifecycle for locally-owned plugin processes:
//! load the plugin config, spawn children, watch them, and restart
//! crashed ones within a bounded retry budget. External plugins are
//! declared in the same config but never spawned; they connect on their
//! own and the hub only needs to know they are not startable here.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

/// How long `stop` waits for a child to die before giving up.
const STOP_WAIT: Duration = Duration::from_secs(5);

/// Pause between the stop and start halves of a restart.
const RESTART_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("plugin not declared in config: {0}")]
    NotDeclared(String),

    #[error("plugin {0} is external and connects on its own")]
    NotLocal(String),

    #[error("plugin {0} is already {1}")]
    AlreadyRunning(String, PluginStatus),

    #[error("plugin {0} exceeded max restarts ({1})")]
    RestartLimit(String, u32),

    #[error("executable not found: {0}")]
    ExecutableMissing(PathBuf),

    #[error("failed to spawn plugin {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("failed to read plugin config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse plugin config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where a supervised plugin is in its lifecycle. `Online` is only set
/// when the plugin actually registers with the hub; spawning alone gets
/// it to `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Stopped,
    Starting,
    Online,
    Offline,
    Error,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginStatus::Stopped => "stopped",
            PluginStatus::Starting => "starting",
            PluginStatus::Online => "online",
            PluginStatus::Offline => "offline",
            PluginStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    Local,
    External,
}

/// One entry of the plugin configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: PluginKind,
    #[serde(default)]
    pub executable_path: PathBuf,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment, `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub restart_on_crash: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Advisory only; surfaced in status snapshots.
    #[serde(default)]
    pub is_critical: bool,
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_delay_ms() -> u64 {
    3000
}

/// Mutable state of one supervised plugin.
#[derive(Debug)]
struct ProcessEntry {
    config: PluginConfig,
    status: PluginStatus,
    restart_count: u32,
    started_at: Option<Instant>,
    pid: Option<u32>,
    last_error: Option<String>,
    /// Tells the monitor task to kill the child.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Fires once when the child exits.
    exit_rx: Option<watch::Receiver<bool>>,
}

impl ProcessEntry {
    fn new(config: PluginConfig) -> Self {
        Self {
            config,
            status: PluginStatus::Stopped,
            restart_count: 0,
            started_at: None,
            pid: None,
            last_error: None,
            kill_tx: None,
            exit_rx: None,
        }
    }

    fn snapshot(&self) -> Value {
        let mut value = json!({
            "id": self.config.id,
            "name": self.config.name,
            "status": self.status.as_str(),
            "restart_count": self.restart_count,
            "max_restarts": self.config.max_restarts,
            "is_critical": self.config.is_critical,
        });
        if let Some(pid) = self.pid {
            value["pid"] = json!(pid);
        }
        if let Some(started) = self.started_at {
            value["uptime"] = json!(started.elapsed().as_secs());
        }
        if let Some(error) = &self.last_error {
            value["last_error"] = json!(error);
        }
        value
    }
}

/// Owner of every locally-supervised plugin process.
pub struct Supervisor {
    config_path: PathBuf,
    plugins: Mutex<HashMap<String, ProcessEntry>>,
    local_ids: HashSet<String>,
    external_ids: HashSet<String>,
    /// One-shot latch; set by `stop_all` and never cleared. Suppresses
    /// every auto-restart path.
    shutting_down: AtomicBool,
    self_ref: OnceLock<Weak<Supervisor>>,
}

impl Supervisor {
    /// Load the plugin configuration and build the process table.
    ///
    /// A missing file is replaced with a well-formed default and is not
    /// an error; an unparseable file is.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Arc<Self>, SupervisorError> {
        let path = path.into();

        let configs: HashMap<String, PluginConfig> = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&raw)?
        } else {
            warn!(path = %path.display(), "plugin config not found, writing a default");
            let defaults = Self::default_config();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serde_json::to_string_pretty(&defaults)?).await?;
            defaults
        };

        let mut table = HashMap::new();
        let mut local_ids = HashSet::new();
        let mut external_ids = HashSet::new();

        for (id, mut config) in configs {
            config.id = id.clone();
            if config.name.is_empty() {
                config.name = id.clone();
            }
            match config.kind {
                PluginKind::External => {
                    debug!(plugin_id = %id, "external plugin, managed remotely");
                    external_ids.insert(id);
                }
                PluginKind::Local => {
                    local_ids.insert(id.clone());
                    table.insert(id, ProcessEntry::new(config));
                }
            }
        }
        info!(
            local = table.len(),
            external = external_ids.len(),
            path = %path.display(),
            "loaded plugin configurations"
        );

        let supervisor = Arc::new(Self {
            config_path: path,
            plugins: Mutex::new(table),
            local_ids,
            external_ids,
            shutting_down: AtomicBool::new(false),
            self_ref: OnceLock::new(),
        });
        let _ = supervisor.self_ref.set(Arc::downgrade(&supervisor));
        Ok(supervisor)
    }

    fn default_config() -> HashMap<String, PluginConfig> {
        let mut defaults = HashMap::new();
        defaults.insert(
            "timer-plugin".to_string(),
            PluginConfig {
                id: "timer-plugin".to_string(),
                name: "Timer Plugin".to_string(),
                kind: PluginKind::Local,
                executable_path: PathBuf::from("./plugins/timer-plugin/timer-plugin"),
                working_dir: Some(PathBuf::from("./plugins/timer-plugin")),
                args: Vec::new(),
                env: Vec::new(),
                auto_start: false,
                restart_on_crash: true,
                max_restarts: 3,
                restart_delay_ms: 3000,
                startup_delay_ms: 1000,
                is_critical: false,
            },
        );
        defaults
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Whether this id is a local plugin the supervisor can spawn.
    pub fn is_local(&self, id: &str) -> bool {
        self.local_ids.contains(id)
    }

    /// Whether this id appears anywhere in the config.
    pub fn is_declared(&self, id: &str) -> bool {
        self.local_ids.contains(id) || self.external_ids.contains(id)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn shared(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    /// Start a local plugin process.
    ///
    /// Rejected when the plugin is unknown, external, already running,
    /// or past its restart budget. Returns after `startup_delay_ms` so
    /// the child has a chance to bind before peers go looking for it.
    ///
    /// Boxed to break the recursive opaque-type cycle between this
    /// method and `monitor_process`, which calls back into it on
    /// auto-restart; without erasure the compiler cannot prove the
    /// resulting future is `Send`.
    pub fn start<'a>(
        &'a self,
        id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SupervisorError>> + Send + 'a>>
    {
        Box::pin(self.start_inner(id))
    }

    async fn start_inner(&self, id: &str) -> Result<(), SupervisorError> {
        if self.external_ids.contains(id) {
            return Err(SupervisorError::NotLocal(id.to_string()));
        }

        let config = {
            let mut table = self.plugins.lock().await;
            let entry = table
                .get_mut(id)
                .ok_or_else(|| SupervisorError::NotDeclared(id.to_string()))?;

            if matches!(entry.status, PluginStatus::Online | PluginStatus::Starting) {
                return Err(SupervisorError::AlreadyRunning(id.to_string(), entry.status));
            }
            // The first start is always allowed; the cap applies to
            // restarts only.
            if entry.restart_count > 0 && entry.restart_count >= entry.config.max_restarts {
                return Err(SupervisorError::RestartLimit(
                    id.to_string(),
                    entry.config.max_restarts,
                ));
            }
            entry.status = PluginStatus::Starting;
            entry.config.clone()
        };

        let executable = match resolve_executable(&config.executable_path) {
            Ok(path) => path,
            Err(e) => {
                self.record_failure(id, &e.to_string()).await;
                return Err(e);
            }
        };

        let mut command = Command::new(&executable);
        command.args(&config.args);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        for pair in &config.env {
            if let Some((key, value)) = pair.split_once('=') {
                command.env(key, value);
            }
        }
        command.env("PLUGIN_ID", id);
        command.kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.record_failure(id, &e.to_string()).await;
                return Err(SupervisorError::Spawn(id.to_string(), e));
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(false);
        {
            let mut table = self.plugins.lock().await;
            if let Some(entry) = table.get_mut(id) {
                entry.pid = child.id();
                entry.started_at = Some(Instant::now());
                entry.restart_count += 1;
                entry.last_error = None;
                entry.kill_tx = Some(kill_tx);
                entry.exit_rx = Some(exit_rx);
            }
        }
        info!(plugin_id = %id, pid = ?child.id(), "plugin process started");

        if let Some(supervisor) = self.shared() {
            tokio::spawn(monitor_process(
                supervisor,
                id.to_string(),
                child,
                kill_rx,
                exit_tx,
            ));
        }

        if config.startup_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)).await;
        }
        Ok(())
    }

    async fn record_failure(&self, id: &str, error: &str) {
        let mut table = self.plugins.lock().await;
        if let Some(entry) = table.get_mut(id) {
            entry.status = PluginStatus::Error;
            entry.last_error = Some(error.to_string());
        }
    }

    /// Stop a local plugin, waiting up to five seconds for it to die.
    /// A plugin with no live process is not an error.
    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let (kill_tx, exit_rx) = {
            let mut table = self.plugins.lock().await;
            let entry = table
                .get_mut(id)
                .ok_or_else(|| SupervisorError::NotDeclared(id.to_string()))?;
            (entry.kill_tx.take(), entry.exit_rx.take())
        };

        if kill_tx.is_none() && exit_rx.is_none() {
            debug!(plugin_id = %id, "plugin is not running");
            return Ok(());
        }

        info!(plugin_id = %id, "stopping plugin");
        if let Some(tx) = kill_tx {
            let _ = tx.send(());
        }
        if let Some(mut rx) = exit_rx {
            if tokio::time::timeout(STOP_WAIT, rx.changed()).await.is_err() {
                warn!(plugin_id = %id, "plugin did not stop in time, giving up");
            }
        }

        let mut table = self.plugins.lock().await;
        if let Some(entry) = table.get_mut(id) {
            entry.status = PluginStatus::Stopped;
            entry.pid = None;
        }
        Ok(())
    }

    /// Stop then start, with a short pause for the old process to
    /// release its resources.
    pub async fn restart(&self, id: &str) -> Result<(), SupervisorError> {
        info!(plugin_id = %id, "restarting plugin");
        if let Err(e) = self.stop(id).await {
            warn!(plugin_id = %id, error = %e, "stop during restart failed");
        }
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start(id).await
    }

    /// Latch shutdown and stop every local plugin. Children exiting
    /// after this point are not respawned.
    pub async fn stop_all(&self) {
        info!("stopping all plugins");
        self.shutting_down.store(true, Ordering::SeqCst);

        let ids: Vec<String> = self.plugins.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!(plugin_id = %id, error = %e, "error stopping plugin");
            }
        }
        info!("all plugins stopped");
    }

    /// Start every local plugin marked `auto_start`.
    pub async fn auto_start(&self) {
        let ids: Vec<String> = {
            let table = self.plugins.lock().await;
            table
                .iter()
                .filter(|(_, entry)| entry.config.auto_start)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            info!(plugin_id = %id, "auto-starting plugin");
            if let Err(e) = self.start(&id).await {
                warn!(plugin_id = %id, error = %e, "auto-start failed");
            }
        }
    }

    /// Called by the hub when the plugin's peer actually registers;
    /// that, not the spawn, is the readiness signal.
    pub async fn mark_online(&self, id: &str) {
        let mut table = self.plugins.lock().await;
        if let Some(entry) = table.get_mut(id) {
            entry.status = PluginStatus::Online;
            info!(plugin_id = %id, "plugin online");
        }
    }

    /// Called by the hub when the plugin's peer disconnects while the
    /// process may still be running.
    pub async fn mark_offline(&self, id: &str) {
        let mut table = self.plugins.lock().await;
        if let Some(entry) = table.get_mut(id) {
            if entry.status == PluginStatus::Online {
                entry.status = PluginStatus::Offline;
            }
        }
    }

    /// Re-arm a plugin that hit its restart budget.
    pub async fn reset_restart_count(&self, id: &str) -> Result<(), SupervisorError> {
        let mut table = self.plugins.lock().await;
        let entry = table
            .get_mut(id)
            .ok_or_else(|| SupervisorError::NotDeclared(id.to_string()))?;
        entry.restart_count = 0;
        info!(plugin_id = %id, "restart count reset");
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Option<Value> {
        let table = self.plugins.lock().await;
        table.get(id).map(ProcessEntry::snapshot)
    }

    pub async fn status_all(&self) -> Vec<Value> {
        let table = self.plugins.lock().await;
        let mut statuses: Vec<Value> = table.values().map(ProcessEntry::snapshot).collect();
        statuses.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
        statuses
    }
}

fn resolve_executable(path: &Path) -> Result<PathBuf, SupervisorError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    if absolute.exists() {
        Ok(absolute)
    } else {
        Err(SupervisorError::ExecutableMissing(absolute))
    }
}

/// Watch one child until it exits, then apply the restart policy.
async fn monitor_process(
    supervisor: Arc<Supervisor>,
    id: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            debug!(plugin_id = %id, "kill requested");
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let (should_restart, delay) = {
        let mut table = supervisor.plugins.lock().await;
        let Some(entry) = table.get_mut(&id) else {
            return;
        };
        entry.pid = None;
        entry.kill_tx = None;
        entry.exit_rx = None;

        match &status {
            Ok(exit) if exit.success() => {
                entry.status = PluginStatus::Stopped;
                info!(plugin_id = %id, "plugin exited cleanly");
            }
            Ok(exit) => {
                entry.status = PluginStatus::Error;
                entry.last_error = Some(format!("exited with {exit}"));
                warn!(plugin_id = %id, status = %exit, "plugin exited with error");
            }
            Err(e) => {
                entry.status = PluginStatus::Error;
                entry.last_error = Some(e.to_string());
                warn!(plugin_id = %id, error = %e, "failed to observe plugin exit");
            }
        }

        let capped = entry.restart_count >= entry.config.max_restarts;
        let restart = entry.config.restart_on_crash && !supervisor.is_shutting_down() && !capped;
        if entry.config.restart_on_crash && !supervisor.is_shutting_down() && capped {
            warn!(
                plugin_id = %id,
                restarts = entry.restart_count,
                "restart limit reached, giving up"
            );
        }
        (restart, Duration::from_millis(entry.config.restart_delay_ms))
    };

    // The exit signal fires exactly once per process generation; the
    // next start installs a fresh channel.
    let _ = exit_tx.send(true);

    if should_restart {
        info!(plugin_id = %id, delay_ms = delay.as_millis() as u64, "restarting plugin");
        tokio::time::sleep(delay).await;
        // The latch may have flipped while we slept.
        if supervisor.is_shutting_down() {
            return;
        }
        if let Err(e) = supervisor.start(&id).await {
            warn!(plugin_id = %id, error = %e, "automatic restart failed");
        }
    } else if supervisor.is_shutting_down() {
        debug!(plugin_id = %id, "plugin exited during shutdown, not restarting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn supervisor_from(
        name: &str,
        configs: HashMap<String, PluginConfig>,
    ) -> Arc<Supervisor> {
        let path = std::env::temp_dir().join(format!(
            "stagelink-supervisor-{}-{}.json",
            name,
            std::process::id()
        ));
        let raw = serde_json::to_string_pretty(&configs).unwrap();
        tokio::fs::write(&path, raw).await.unwrap();
        Supervisor::load(&path).await.unwrap()
    }

    fn shell_plugin(id: &str, script: &str) -> PluginConfig {
        PluginConfig {
            id: id.to_string(),
            name: id.to_string(),
            kind: PluginKind::Local,
            executable_path: PathBuf::from("/bin/sh"),
            working_dir: None,
            args: vec!["-c".to_string(), script.to_string()],
            env: Vec::new(),
            auto_start: false,
            restart_on_crash: false,
            max_restarts: 3,
            restart_delay_ms: 50,
            startup_delay_ms: 0,
            is_critical: false,
        }
    }

    #[tokio::test]
    async fn test_load_creates_default_config() {
        let path = std::env::temp_dir().join(format!(
            "stagelink-default-config-{}/plugins.json",
            std::process::id()
        ));
        let _ = tokio::fs::remove_file(&path).await;

        let supervisor = Supervisor::load(&path).await.unwrap();
        assert!(tokio::fs::try_exists(&path).await.unwrap());
        assert!(supervisor.is_local("timer-plugin"));

        // The written default must itself load cleanly.
        let reloaded = Supervisor::load(&path).await.unwrap();
        assert!(reloaded.is_declared("timer-plugin"));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_config() {
        let path = std::env::temp_dir().join(format!(
            "stagelink-bad-config-{}.json",
            std::process::id()
        ));
        tokio::fs::write(&path, "{not json").await.unwrap();

        assert!(matches!(
            Supervisor::load(&path).await,
            Err(SupervisorError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_undeclared_and_external() {
        let mut configs = HashMap::new();
        let mut external = shell_plugin("remote-cam", "exit 0");
        external.kind = PluginKind::External;
        configs.insert("remote-cam".to_string(), external);
        let supervisor = supervisor_from("rejects", configs).await;

        assert!(matches!(
            supervisor.start("ghost").await,
            Err(SupervisorError::NotDeclared(_))
        ));
        assert!(matches!(
            supervisor.start("remote-cam").await,
            Err(SupervisorError::NotLocal(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_typed_error() {
        let mut configs = HashMap::new();
        let mut plugin = shell_plugin("lost", "exit 0");
        plugin.executable_path = PathBuf::from("/no/such/binary");
        configs.insert("lost".to_string(), plugin);
        let supervisor = supervisor_from("missing-exe", configs).await;

        assert!(matches!(
            supervisor.start("lost").await,
            Err(SupervisorError::ExecutableMissing(_))
        ));
        let status = supervisor.status("lost").await.unwrap();
        assert_eq!(status["status"], "error");
        assert!(status["last_error"].as_str().unwrap().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_restart_stops_at_the_cap() {
        let mut configs = HashMap::new();
        let mut plugin = shell_plugin("crasher", "exit 1");
        plugin.restart_on_crash = true;
        plugin.max_restarts = 2;
        configs.insert("crasher".to_string(), plugin);
        let supervisor = supervisor_from("crash-cap", configs).await;

        supervisor.start("crasher").await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;

        let status = supervisor.status("crasher").await.unwrap();
        assert_eq!(status["status"], "error");
        assert_eq!(status["restart_count"], 2);
        assert!(status["last_error"].as_str().is_some());

        // The cap also blocks manual starts until the counter is reset.
        assert!(matches!(
            supervisor.start("crasher").await,
            Err(SupervisorError::RestartLimit(_, 2))
        ));
        supervisor.reset_restart_count("crasher").await.unwrap();
        supervisor.start("crasher").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_a_long_running_child() {
        let mut configs = HashMap::new();
        configs.insert("sleeper".to_string(), shell_plugin("sleeper", "sleep 30"));
        let supervisor = supervisor_from("stop", configs).await;

        supervisor.start("sleeper").await.unwrap();
        let before = Instant::now();
        supervisor.stop("sleeper").await.unwrap();
        assert!(before.elapsed() < STOP_WAIT);

        let status = supervisor.status("sleeper").await.unwrap();
        assert_eq!(status["status"], "stopped");
        assert!(status.get("pid").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_suppresses_auto_restart() {
        let mut configs = HashMap::new();
        let mut plugin = shell_plugin("steady", "sleep 30");
        plugin.restart_on_crash = true;
        configs.insert("steady".to_string(), plugin);
        let supervisor = supervisor_from("shutdown", configs).await;

        supervisor.start("steady").await.unwrap();
        supervisor.stop_all().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = supervisor.status("steady").await.unwrap();
        assert_eq!(status["status"], "stopped");
        assert_eq!(status["restart_count"], 1);
        assert!(supervisor.is_shutting_down());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_of_idle_plugin_is_a_no_op() {
        let mut configs = HashMap::new();
        configs.insert("idle".to_string(), shell_plugin("idle", "exit 0"));
        let supervisor = supervisor_from("idle", configs).await;

        supervisor.stop("idle").await.unwrap();
        let status = supervisor.status("idle").await.unwrap();
        assert_eq!(status["status"], "stopped");
        assert_eq!(status["restart_count"], 0);
    }
}
