//! Status poller
//!
//! Two cadences drive the registry:
//! - slow: container listing, container stats, native process table
//! - fast: host CPU, memory and disk
//!
//! Every command is best-effort. A failed or timed-out command leaves the
//! previous values in place; a tick's results are gathered first and then
//! published as one snapshot swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::parse::{self, ResourceStat};
use crate::registry::{RegistryEvent, ServiceKind, ServiceRegistry};
use crate::runner::{argv, CommandRunner};

pub const LISTING_FORMAT: &str = "{{.Names}}|{{.Status}}|{{.CreatedAt}}|{{.Image}}";
pub const STATS_FORMAT: &str = "{{.Name}}|{{.CPUPerc}}|{{.MemUsage}}";

const EVENT_CAPACITY: usize = 64;

pub struct StatusPoller {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<ServiceRegistry>,
    events: broadcast::Sender<RegistryEvent>,
}

/// Raw results of the slow tick
#[derive(Debug, Default)]
struct ServiceObservation {
    /// name -> uptime; `None` when no clean listing was obtained
    containers: Option<HashMap<String, String>>,
    stats: Option<Vec<ResourceStat>>,
    /// names of native services present in the process table
    natives: Option<HashMap<String, String>>,
}

impl StatusPoller {
    pub fn new(
        config: Arc<Config>,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            runner,
            registry,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Run one command, returning stdout only on a clean exit
    async fn inspect(&self, program: &str, args: &[&str]) -> Option<String> {
        let args = argv(args.iter().copied());
        match self
            .runner
            .run(program, &args, self.config.inspect_timeout())
            .await
        {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(output) => {
                log::warn!(
                    "{} {} exited with {:?}: {}",
                    program,
                    args.join(" "),
                    output.exit_code,
                    output.stderr.trim()
                );
                None
            }
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    async fn observe_services(&self) -> ServiceObservation {
        let docker = self.config.docker.as_str();
        let mut observation = ServiceObservation::default();

        if let Some(listing) = self
            .inspect(docker, &["ps", "-a", "--format", LISTING_FORMAT])
            .await
        {
            let now = Utc::now();
            let running = parse::parse_container_listing(&listing)
                .into_iter()
                .filter(|entry| entry.running)
                .map(|entry| {
                    let uptime = parse::format_uptime(&entry.created_at, now);
                    (entry.name, uptime)
                })
                .collect();
            observation.containers = Some(running);
        }

        if let Some(stats) = self
            .inspect(docker, &["stats", "--no-stream", "--format", STATS_FORMAT])
            .await
        {
            observation.stats = Some(parse::parse_resource_stats(&stats));
        }

        if let Some(table) = self.inspect("ps", &["aux"]).await {
            let present = self
                .config
                .services
                .iter()
                .filter(|s| s.kind == ServiceKind::Native)
                .filter(|s| parse::process_present(&table, &s.name))
                .map(|s| (s.name.clone(), String::new()))
                .collect();
            observation.natives = Some(present);
        }

        observation
    }

    /// Slow tick; returns whether anything observable changed
    pub async fn poll_services(&self) -> bool {
        let observation = self.observe_services().await;
        let critical = &self.config.critical_services;

        let (services_changed, health_changed, healthy) = self.registry.update(|snap| {
            let mut changed = false;
            if let Some(containers) = &observation.containers {
                changed |= snap.reconcile(ServiceKind::Container, containers);
            }
            if let Some(stats) = &observation.stats {
                changed |= snap.apply_resource_stats(stats);
            }
            if let Some(natives) = &observation.natives {
                changed |= snap.reconcile(ServiceKind::Native, natives);
            }
            let flipped = snap.recompute_health(critical);
            (changed, flipped, snap.health.healthy)
        });

        if services_changed {
            self.emit(RegistryEvent::ServicesChanged);
        }
        if health_changed {
            log::info!("System health: {}", if healthy { "healthy" } else { "degraded" });
            self.emit(RegistryEvent::HealthChanged(healthy));
        }
        services_changed || health_changed
    }

    /// Fast tick; returns whether anything observable changed
    pub async fn poll_system_stats(&self) -> bool {
        let cpu = self.inspect("top", &["-bn1"]).await;
        let memory = self.inspect("free", &["-m"]).await;
        let disk = self.inspect("df", &["-h", "/"]).await;

        let cpu = cpu.as_deref().and_then(parse::parse_cpu_line);
        let memory = memory.as_deref().and_then(parse::parse_memory_summary);
        let disk = disk.as_deref().and_then(parse::parse_disk_summary);
        let critical = &self.config.critical_services;

        let (stats_changed, health_changed, healthy) = self.registry.update(|snap| {
            let before = snap.stats.clone();
            // Missing figures keep their last known value
            if let Some(cpu) = cpu {
                snap.stats.cpu_usage = cpu;
            }
            if let Some(memory) = memory {
                snap.stats.memory_usage = memory.usage_percent;
                snap.stats.memory_used_gb = memory.used_gb;
                snap.stats.memory_total_gb = memory.total_gb;
            }
            if let Some(disk) = disk {
                snap.stats.disk_usage = disk.usage_percent;
                snap.stats.disk_used_gb = disk.used_gb;
                snap.stats.disk_total_gb = disk.total_gb;
            }
            let flipped = snap.recompute_health(critical);
            (before != snap.stats, flipped, snap.health.healthy)
        });

        if stats_changed {
            self.emit(RegistryEvent::StatsChanged);
        }
        if health_changed {
            log::info!("System health: {}", if healthy { "healthy" } else { "degraded" });
            self.emit(RegistryEvent::HealthChanged(healthy));
        }
        stats_changed || health_changed
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Start both cadences on a background task
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> PollerHandle {
        let (tx, rx) = mpsc::channel(1);
        let refresh = RefreshTrigger {
            tx,
            delay: self.config.refresh_delay(),
        };
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(rx, task_cancel).await });
        PollerHandle {
            cancel,
            join,
            refresh,
        }
    }

    async fn run(&self, mut refresh: mpsc::Receiver<()>, cancel: CancellationToken) {
        let mut slow = interval(self.config.slow_poll());
        let mut fast = interval(self.config.fast_poll());
        slow.set_missed_tick_behavior(MissedTickBehavior::Skip);
        fast.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "Status poller started (services every {:?}, system every {:?})",
            self.config.slow_poll(),
            self.config.fast_poll()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = slow.tick() => {
                    self.poll_services().await;
                }
                _ = fast.tick() => {
                    self.poll_system_stats().await;
                }
                Some(()) = refresh.recv() => {
                    log::debug!("Refresh requested");
                    self.poll_services().await;
                }
            }
        }

        log::info!("Status poller stopped");
    }
}

/// Asks a running poller for an out-of-cadence service refresh
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
    delay: Duration,
}

impl RefreshTrigger {
    /// Detached trigger for callers that run without a poller
    pub fn disconnected() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self {
            tx,
            delay: Duration::ZERO,
        }
    }

    /// Schedule a refresh once the configured delay has passed
    pub fn request(&self) {
        let tx = self.tx.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A full channel already has a refresh pending
            let _ = tx.try_send(());
        });
    }
}

pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    refresh: RefreshTrigger,
}

impl PollerHandle {
    pub fn refresh_trigger(&self) -> RefreshTrigger {
        self.refresh.clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            log::error!("Status poller task failed: {}", e);
        }
    }
}
