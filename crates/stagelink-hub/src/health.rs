//! Health Monitor
//!
//! Counts application-level heartbeats per peer, flags the ones that go
//! quiet, and remediates expected local plugins by asking the
//! supervisor for a restart. Each check tick also publishes a
//! `health_status` report to the main module through the hub's normal
//! routing, so the report is subject to the same backpressure as any
//! other message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use stagelink_protocol::{Envelope, HUB_ID};

use crate::hub::Hub;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Consecutive failed checks before remediation.
    pub max_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            max_failures: 3,
        }
    }
}

/// Liveness bookkeeping for one monitored peer.
#[derive(Debug, Clone)]
pub struct HealthEntry {
    pub last_heartbeat: DateTime<Utc>,
    pub heartbeat_count: u64,
    pub consecutive_fails: u32,
    pub healthy: bool,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            last_heartbeat: Utc::now(),
            heartbeat_count: 0,
            consecutive_fails: 0,
            healthy: true,
        }
    }
}

pub struct HealthMonitor {
    hub: Arc<Hub>,
    supervisor: Option<Arc<Supervisor>>,
    entries: DashMap<String, HealthEntry>,
    config: HealthConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(hub: Arc<Hub>, supervisor: Option<Arc<Supervisor>>) -> Arc<Self> {
        Self::with_config(hub, supervisor, HealthConfig::default())
    }

    pub fn with_config(
        hub: Arc<Hub>,
        supervisor: Option<Arc<Supervisor>>,
        config: HealthConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            hub,
            supervisor,
            entries: DashMap::new(),
            config,
            shutdown_tx,
        })
    }

    /// Start tracking a peer. Called on registration.
    pub fn register_peer(&self, id: &str) {
        self.entries.insert(id.to_string(), HealthEntry::new());
        debug!(peer_id = %id, "peer registered for health monitoring");
    }

    /// Drop a peer's entry. Called on disconnect.
    pub fn unregister_peer(&self, id: &str) {
        self.entries.remove(id);
        debug!(peer_id = %id, "peer unregistered from health monitoring");
    }

    /// Ingest a heartbeat: refresh the entry, clear any failure state.
    /// Peers the hub never registered are picked up on the fly.
    pub fn record_heartbeat(&self, id: &str) {
        let mut entry = self
            .entries
            .entry(id.to_string())
            .or_insert_with(HealthEntry::new);
        entry.last_heartbeat = Utc::now();
        entry.heartbeat_count += 1;
        entry.consecutive_fails = 0;
        if !entry.healthy {
            entry.healthy = true;
            info!(peer_id = %id, "peer is healthy again");
        }
    }

    /// Run the check loop until `stop`.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.check_interval);
        info!("health monitor running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                    self.publish_status().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("health monitor stopped");
                    return;
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One pass over every entry whose peer is still connected.
    pub async fn check_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let timeout_ms = self.config.heartbeat_timeout.as_millis() as i64;

        for id in ids {
            // A disconnected peer is the teardown path's problem, not a
            // heartbeat failure.
            if !self.hub.is_peer_active(&id).await {
                continue;
            }

            let failures = {
                let Some(mut entry) = self.entries.get_mut(&id) else {
                    continue;
                };
                let silent_ms = (Utc::now() - entry.last_heartbeat).num_milliseconds();
                if silent_ms <= timeout_ms {
                    continue;
                }
                entry.consecutive_fails += 1;
                if entry.healthy {
                    entry.healthy = false;
                    warn!(
                        peer_id = %id,
                        silent_secs = silent_ms / 1000,
                        "peer heartbeat timeout"
                    );
                }
                entry.consecutive_fails
            };

            if failures >= self.config.max_failures {
                warn!(peer_id = %id, failures, "peer exceeded max heartbeat failures");
                self.remediate(&id).await;
            }
        }
    }

    /// Restart an expected local plugin that went silent; externals can
    /// only be reported on.
    async fn remediate(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.consecutive_fails = 0;
        }

        if !self.hub.is_expected(id).await {
            return;
        }
        let Some(supervisor) = self
            .supervisor
            .as_ref()
            .filter(|sup| sup.is_local(id))
        else {
            warn!(peer_id = %id, "no supervised process for this peer, reporting only");
            return;
        };

        info!(plugin_id = %id, "restarting unhealthy plugin");
        let supervisor = Arc::clone(supervisor);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = supervisor.restart(&id).await {
                warn!(plugin_id = %id, error = %e, "health-triggered restart failed");
            }
        });
    }

    /// Publish a `health_status` report to the main module.
    async fn publish_status(&self) {
        let Some(main_id) = self.hub.main_module_id().await else {
            return;
        };

        let mut payload = json!({
            "health_summary": self.summary(),
            "plugin_health": self.snapshot_all(),
            "timestamp": Utc::now().timestamp(),
        });
        if let Some(supervisor) = &self.supervisor {
            payload["supervisor_status"] = Value::Array(supervisor.status_all().await);
        }

        let envelope = Envelope::with_payload(HUB_ID, main_id, "health_status", payload);
        if !self.hub.submit_internal(envelope) {
            warn!("dropping health report, hub inbound queue full");
        }
    }

    /// Per-peer health table for reports and the status surface.
    pub fn snapshot_all(&self) -> Value {
        let mut table = serde_json::Map::new();
        for entry in self.entries.iter() {
            table.insert(
                entry.key().clone(),
                json!({
                    "plugin_id": entry.key(),
                    "is_healthy": entry.healthy,
                    "heartbeat_count": entry.heartbeat_count,
                    "consecutive_fails": entry.consecutive_fails,
                    "seconds_since_heartbeat":
                        (Utc::now() - entry.last_heartbeat).num_seconds(),
                }),
            );
        }
        Value::Object(table)
    }

    pub fn summary(&self) -> Value {
        let total = self.entries.len();
        let healthy = self.entries.iter().filter(|e| e.healthy).count();
        json!({
            "total_plugins": total,
            "healthy_plugins": healthy,
            "unhealthy_plugins": total - healthy,
            "check_interval_seconds": self.config.check_interval.as_secs(),
            "heartbeat_timeout_seconds": self.config.heartbeat_timeout.as_secs(),
        })
    }

    /// A copy of one entry, mainly for tests and diagnostics.
    pub fn entry(&self, id: &str) -> Option<HealthEntry> {
        self.entries.get(id).map(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with_timeout(timeout: Duration) -> Arc<HealthMonitor> {
        let hub = Arc::new(Hub::new(None));
        HealthMonitor::with_config(
            hub,
            None,
            HealthConfig {
                check_interval: Duration::from_millis(20),
                heartbeat_timeout: timeout,
                max_failures: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_heartbeat_resets_failure_state() {
        let monitor = monitor_with_timeout(Duration::from_secs(30));
        monitor.register_peer("p1");

        {
            let mut entry = monitor.entries.get_mut("p1").unwrap();
            entry.healthy = false;
            entry.consecutive_fails = 2;
        }

        monitor.record_heartbeat("p1");
        let entry = monitor.entry("p1").unwrap();
        assert!(entry.healthy);
        assert_eq!(entry.consecutive_fails, 0);
        assert_eq!(entry.heartbeat_count, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_auto_registers_unknown_peer() {
        let monitor = monitor_with_timeout(Duration::from_secs(30));
        monitor.record_heartbeat("stray");
        assert!(monitor.entry("stray").is_some());
    }

    #[tokio::test]
    async fn test_check_skips_disconnected_peers() {
        let monitor = monitor_with_timeout(Duration::from_millis(1));
        monitor.register_peer("gone");
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The peer is not in the hub registry, so the silence is not
        // counted against it.
        monitor.check_all().await;
        let entry = monitor.entry("gone").unwrap();
        assert!(entry.healthy);
        assert_eq!(entry.consecutive_fails, 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_entry() {
        let monitor = monitor_with_timeout(Duration::from_secs(30));
        monitor.register_peer("p1");
        monitor.unregister_peer("p1");
        assert!(monitor.entry("p1").is_none());
    }

    #[tokio::test]
    async fn test_summary_counts_unhealthy_entries() {
        let monitor = monitor_with_timeout(Duration::from_secs(30));
        monitor.register_peer("a");
        monitor.register_peer("b");
        monitor.entries.get_mut("b").unwrap().healthy = false;

        let summary = monitor.summary();
        assert_eq!(summary["total_plugins"], 2);
        assert_eq!(summary["healthy_plugins"], 1);
        assert_eq!(summary["unhealthy_plugins"], 1);
    }
}
