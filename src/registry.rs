//! Service registry and system health
//!
//! The registry publishes immutable [`RegistrySnapshot`]s. A writer clones
//! the current snapshot, applies a whole poll tick to the copy and swaps it
//! in, so readers never see a half-reconciled tick.
//!
//! ```text
//!   poller ──update()──▶ [clone → mutate → swap] ──▶ Arc<RegistrySnapshot>
//!                                                         ▲
//!   presentation ──────────────── snapshot() ─────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::KnownService;
use crate::parse::ResourceStat;

/// CPU and memory ceiling (percent, exclusive) for a healthy system
pub const HEALTH_LIMIT_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[serde(alias = "docker")]
    Container,
    Native,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Native => "native",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Running,
    Stopped,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    pub name: String,
    pub description: String,
    pub kind: ServiceKind,
    pub status: ServiceStatus,
    pub uptime: String,
    pub cpu_percent: f64,
    pub memory_usage_mib: f64,
}

impl ServiceRecord {
    pub fn new(known: &KnownService) -> Self {
        Self {
            name: known.name.clone(),
            description: known.description.clone(),
            kind: known.kind,
            status: ServiceStatus::Unknown,
            uptime: String::new(),
            cpu_percent: 0.0,
            memory_usage_mib: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }
}

/// Host resource figures as last parsed from top/free/df
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
}

impl Default for SystemStats {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            disk_usage: 0.0,
            memory_used_gb: 0.0,
            memory_total_gb: 8.0,
            disk_used_gb: 0.0,
            disk_total_gb: 32.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemHealth {
    pub healthy: bool,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

/// What changed in a published snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    ServicesChanged,
    StatsChanged,
    HealthChanged(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub services: Vec<ServiceRecord>,
    pub stats: SystemStats,
    pub health: SystemHealth,
}

impl RegistrySnapshot {
    /// Every known service starts out `unknown`
    pub fn new(known: &[KnownService]) -> Self {
        Self {
            services: known.iter().map(ServiceRecord::new).collect(),
            stats: SystemStats::default(),
            health: SystemHealth::default(),
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Mark every known service of `kind` running (with its uptime) when it
    /// appears in `running`, stopped otherwise. Names outside the static
    /// catalog are ignored. Returns whether anything changed.
    pub fn reconcile(&mut self, kind: ServiceKind, running: &HashMap<String, String>) -> bool {
        let mut changed = false;
        for service in self.services.iter_mut().filter(|s| s.kind == kind) {
            let (status, uptime) = match running.get(&service.name) {
                Some(uptime) => (ServiceStatus::Running, uptime.clone()),
                None => (ServiceStatus::Stopped, String::new()),
            };
            if service.status != status || service.uptime != uptime {
                service.status = status;
                service.uptime = uptime;
                changed = true;
            }
        }
        changed
    }

    /// Overlay cpu/memory figures onto services by name; unmatched rows are dropped
    pub fn apply_resource_stats(&mut self, stats: &[ResourceStat]) -> bool {
        let mut changed = false;
        for stat in stats {
            let Some(service) = self.services.iter_mut().find(|s| s.name == stat.name) else {
                log::debug!("stats row for untracked container {}", stat.name);
                continue;
            };
            if service.cpu_percent != stat.cpu_percent
                || service.memory_usage_mib != stat.memory_mib
            {
                service.cpu_percent = stat.cpu_percent;
                service.memory_usage_mib = stat.memory_mib;
                changed = true;
            }
        }
        changed
    }

    /// Recompute the health aggregate; returns whether `healthy` flipped
    pub fn recompute_health(&mut self, critical: &[String]) -> bool {
        let critical_running = critical
            .iter()
            .all(|name| self.service(name).map(ServiceRecord::is_running).unwrap_or(false));

        let healthy = critical_running
            && self.stats.cpu_usage < HEALTH_LIMIT_PERCENT
            && self.stats.memory_usage < HEALTH_LIMIT_PERCENT;

        let was_healthy = self.health.healthy;
        self.health = SystemHealth {
            healthy,
            cpu_usage: self.stats.cpu_usage,
            memory_usage: self.stats.memory_usage,
            disk_usage: self.stats.disk_usage,
        };
        was_healthy != healthy
    }
}

/// Owner of the current snapshot
#[derive(Debug)]
pub struct ServiceRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes writers so concurrent updates cannot lose each other's work
    writer: Mutex<()>,
}

impl ServiceRegistry {
    pub fn new(known: &[KnownService]) -> Self {
        Self::from_snapshot(RegistrySnapshot::new(known))
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, snapshot: RegistrySnapshot) {
        let _writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        self.swap(snapshot);
    }

    /// Apply `f` to a private copy of the current snapshot, then publish it
    pub fn update<R>(&self, f: impl FnOnce(&mut RegistrySnapshot) -> R) -> R {
        let _writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let mut next = (*self.snapshot()).clone();
        let result = f(&mut next);
        self.swap(next);
        result
    }

    fn swap(&self, snapshot: RegistrySnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::new(&Config::default().services)
    }

    fn running(names: &[(&str, &str)]) -> HashMap<String, String> {
        names
            .iter()
            .map(|(n, u)| (n.to_string(), u.to_string()))
            .collect()
    }

    fn critical() -> Vec<String> {
        Config::default().critical_services
    }

    #[test]
    fn test_initial_state_unknown() {
        let snap = snapshot();
        assert!(snap.services.iter().all(|s| s.status == ServiceStatus::Unknown));
        assert!(!snap.health.healthy);
    }

    #[test]
    fn test_reconcile_absent_names_stopped() {
        let mut snap = snapshot();
        snap.reconcile(ServiceKind::Container, &running(&[("sdv-runtime", "5m")]));

        let sdv = snap.service("sdv-runtime").unwrap();
        assert_eq!(sdv.status, ServiceStatus::Running);
        assert_eq!(sdv.uptime, "5m");

        for service in snap.services.iter().filter(|s| s.kind == ServiceKind::Container) {
            if service.name != "sdv-runtime" {
                assert_eq!(service.status, ServiceStatus::Stopped, "{}", service.name);
                assert!(service.uptime.is_empty());
            }
        }
        // Native services are untouched by a container reconcile
        assert_eq!(
            snap.service("dk_can_provider").unwrap().status,
            ServiceStatus::Unknown
        );
    }

    #[test]
    fn test_reconcile_clears_uptime_when_stopped() {
        let mut snap = snapshot();
        snap.reconcile(ServiceKind::Container, &running(&[("dk_ivi", "2h")]));
        assert!(snap.reconcile(ServiceKind::Container, &HashMap::new()));
        let ivi = snap.service("dk_ivi").unwrap();
        assert_eq!(ivi.status, ServiceStatus::Stopped);
        assert_eq!(ivi.uptime, "");
        assert!(!snap.reconcile(ServiceKind::Container, &HashMap::new()));
    }

    #[test]
    fn test_reconcile_ignores_unknown_containers() {
        let mut snap = snapshot();
        let before = snap.services.len();
        snap.reconcile(ServiceKind::Container, &running(&[("random-thing", "1s")]));
        assert_eq!(snap.services.len(), before);
        assert!(snap.service("random-thing").is_none());
    }

    #[test]
    fn test_apply_resource_stats_overlays_by_name() {
        let mut snap = snapshot();
        let changed = snap.apply_resource_stats(&[
            ResourceStat {
                name: "dk_manager".into(),
                cpu_percent: 1.5,
                memory_mib: 120.0,
            },
            ResourceStat {
                name: "stranger".into(),
                cpu_percent: 99.0,
                memory_mib: 1.0,
            },
        ]);
        assert!(changed);
        let mgr = snap.service("dk_manager").unwrap();
        assert_eq!(mgr.cpu_percent, 1.5);
        assert_eq!(mgr.memory_usage_mib, 120.0);
        assert!(!snap.apply_resource_stats(&[]));
    }

    #[test]
    fn test_health_requires_critical_running_and_headroom() {
        let mut snap = snapshot();
        snap.reconcile(
            ServiceKind::Container,
            &running(&[("sdv-runtime", "1m"), ("dk_manager", "1m")]),
        );
        snap.stats.cpu_usage = 10.0;
        snap.stats.memory_usage = 89.9;
        assert!(snap.recompute_health(&critical()));
        assert!(snap.health.healthy);
        assert!(!snap.recompute_health(&critical()));

        snap.stats.memory_usage = 90.0;
        assert!(snap.recompute_health(&critical()));
        assert!(!snap.health.healthy);

        snap.stats.memory_usage = 20.0;
        snap.stats.cpu_usage = 90.0;
        snap.recompute_health(&critical());
        assert!(!snap.health.healthy);

        snap.stats.cpu_usage = 5.0;
        snap.reconcile(ServiceKind::Container, &running(&[("sdv-runtime", "1m")]));
        snap.recompute_health(&critical());
        assert!(!snap.health.healthy);
    }

    #[test]
    fn test_health_missing_critical_name_is_unhealthy() {
        let mut snap = snapshot();
        snap.reconcile(
            ServiceKind::Container,
            &running(&[("sdv-runtime", "1m"), ("dk_manager", "1m")]),
        );
        snap.recompute_health(&["not-in-catalog".to_string()]);
        assert!(!snap.health.healthy);
    }

    #[test]
    fn test_update_publishes_whole_snapshot() {
        let registry = ServiceRegistry::new(&Config::default().services);
        let before = registry.snapshot();

        registry.update(|snap| {
            snap.reconcile(ServiceKind::Container, &running(&[("dk_ivi", "3s")]));
            snap.stats.cpu_usage = 42.0;
        });

        // Earlier readers keep their consistent view
        assert_eq!(before.service("dk_ivi").unwrap().status, ServiceStatus::Unknown);
        assert_eq!(before.stats.cpu_usage, 0.0);

        let after = registry.snapshot();
        assert_eq!(after.service("dk_ivi").unwrap().status, ServiceStatus::Running);
        assert_eq!(after.stats.cpu_usage, 42.0);
    }
}
