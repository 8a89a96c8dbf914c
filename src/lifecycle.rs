//! Application lifecycle
//!
//! Start/stop of platform services, deployment of prototypes into app
//! containers, and install/removal of marketplace packages. Container
//! identifiers always travel as separate argv elements and are validated
//! before use, since they also name folders on disk.
//!
//! Catalog mutations run under the [`CatalogStore`] lock for their whole
//! read-modify-write sequence, including the installer run.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use crate::catalog::{CatalogError, CatalogGuard, CatalogStore, CsvAppRow, PackageDescriptor};
use crate::config::Config;
use crate::parse;
use crate::poller::RefreshTrigger;
use crate::prototypes::{PrototypeBook, PrototypeEntry, PrototypeRecord};
use crate::registry::ServiceKind;
use crate::runner::{argv, CommandOutput, CommandRunner, RunError};
use crate::watcher::{DeployReport, DeploymentWatcher};

const REPORT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppCategory {
    App,
    Service,
}

impl AppCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Service => "service",
        }
    }
}

/// Installed app or service as presented to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppRecord {
    pub id: String,
    pub display_name: String,
    pub executable: String,
    pub icon_path: String,
    pub category: AppCategory,
    pub is_subscribed: bool,
}

/// What a start/stop request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// Detached docker command issued; a registry refresh is scheduled
    Triggered,
    /// Native services have no supervisor hook yet
    NativeStub,
}

/// Resolves once the deployment watcher has decided
#[derive(Debug)]
pub struct DeployTicket(oneshot::Receiver<DeployReport>);

impl DeployTicket {
    /// `None` when a later deployment replaced this one
    pub async fn wait(self) -> Option<DeployReport> {
        self.0.await.ok()
    }
}

#[derive(Debug)]
pub enum ExecuteOutcome {
    AlreadyRunning,
    Launched(DeployTicket),
    Stopped,
}

/// Result of launching an installed native app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    AlreadyRunning,
    Launched(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    pub category: AppCategory,
    /// False when the catalog already listed this id
    pub added: bool,
}

pub struct LifecycleController {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<CatalogStore>,
    watcher: Arc<DeploymentWatcher>,
    prototypes: Arc<PrototypeBook>,
    installed: RwLock<Vec<AppRecord>>,
    refresh: RefreshTrigger,
    reports: broadcast::Sender<DeployReport>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<Config>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<CatalogStore>,
        watcher: Arc<DeploymentWatcher>,
        prototypes: Arc<PrototypeBook>,
        refresh: RefreshTrigger,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            config,
            runner,
            store,
            watcher,
            prototypes,
            installed: RwLock::new(Vec::new()),
            refresh,
            reports,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn prototypes(&self) -> &Arc<PrototypeBook> {
        &self.prototypes
    }

    /// Every finished deployment, after the prototype book was updated
    pub fn subscribe_reports(&self) -> broadcast::Receiver<DeployReport> {
        self.reports.subscribe()
    }

    async fn docker(&self, args: Vec<String>) -> Result<CommandOutput, RunError> {
        self.runner
            .run(&self.config.docker, &args, self.config.mutate_timeout())
            .await
    }

    /// Kill and remove a container, ignoring "no such container"
    async fn discard_container(&self, name: &str) {
        for verb in ["kill", "rm"] {
            match self.docker(argv([verb, name])).await {
                Ok(output) if output.success() => log::debug!("docker {} {}", verb, name),
                Ok(output) => log::debug!("docker {} {}: {}", verb, name, output.stderr.trim()),
                Err(e) => log::debug!("docker {} {}: {}", verb, name, e),
            }
        }
    }

    // Platform services

    pub async fn start_service(&self, name: &str) -> Result<ServiceAction, LifecycleError> {
        self.service_verb(name, "start").await
    }

    pub async fn stop_service(&self, name: &str) -> Result<ServiceAction, LifecycleError> {
        self.service_verb(name, "stop").await
    }

    async fn service_verb(&self, name: &str, verb: &str) -> Result<ServiceAction, LifecycleError> {
        let known = self
            .config
            .known(name)
            .ok_or_else(|| LifecycleError::UnknownService(name.to_string()))?;

        match known.kind {
            ServiceKind::Container => {
                log::info!("{} {}", verb, name);
                self.runner
                    .spawn_detached(&self.config.docker, &argv([verb, name]))
                    .await?;
                self.refresh.request();
                Ok(ServiceAction::Triggered)
            }
            ServiceKind::Native => {
                log::info!("{} {}: native service control is not implemented", verb, name);
                Ok(ServiceAction::NativeStub)
            }
        }
    }

    // Prototype deployment

    pub async fn execute_app(
        &self,
        id: &str,
        name: &str,
        subscribe: bool,
    ) -> Result<ExecuteOutcome, LifecycleError> {
        validate_id(id)?;
        if subscribe {
            self.launch(id, name).await
        } else {
            self.unsubscribe(id).await?;
            Ok(ExecuteOutcome::Stopped)
        }
    }

    async fn launch(&self, id: &str, name: &str) -> Result<ExecuteOutcome, LifecycleError> {
        match self
            .runner
            .run(&self.config.docker, &argv(["ps"]), self.config.inspect_timeout())
            .await
        {
            Ok(output) if output.success() && output.stdout.contains(id) => {
                log::info!("{} is already running", id);
                return Ok(ExecuteOutcome::AlreadyRunning);
            }
            Ok(output) if !output.success() => {
                log::warn!("docker ps failed: {}", output.stderr.trim());
            }
            Err(e) => log::warn!("{}", e),
            Ok(_) => {}
        }

        self.discard_container(id).await;
        log::info!("Deploying {} ({})", name, id);
        self.docker(app_run_args(&self.config, id))
            .await?
            .checked(&self.config.docker)?;

        let pending = self.watcher.arm(id, name);
        let (tx, rx) = oneshot::channel();
        let prototypes = Arc::clone(&self.prototypes);
        let reports = self.reports.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let Ok(report) = pending.await else {
                log::debug!("Deployment of {} superseded", id);
                return;
            };
            if report.started {
                prototypes.set_subscribed(&report.id, true);
            }
            let _ = reports.send(report.clone());
            let _ = tx.send(report);
        });

        Ok(ExecuteOutcome::Launched(DeployTicket(rx)))
    }

    async fn unsubscribe(&self, id: &str) -> Result<(), LifecycleError> {
        log::info!("Stopping {}", id);
        // Flag flips even if the kill cannot be issued
        self.prototypes.set_subscribed(id, false);
        self.runner
            .spawn_detached(&self.config.docker, &argv(["kill", id]))
            .await?;
        Ok(())
    }

    /// Match every prototype against one `docker ps`; returns ids whose flag flipped
    pub async fn check_running(&self) -> Result<Vec<String>, LifecycleError> {
        let output = self
            .runner
            .run(&self.config.docker, &argv(["ps"]), self.config.inspect_timeout())
            .await?
            .checked(&self.config.docker)?;
        Ok(self.prototypes.sync_running(&output.stdout))
    }

    pub async fn reload_prototypes(&self) -> usize {
        let guard = self.store.lock().await;
        self.prototypes.reload(&guard, &self.config.prototypes_file())
    }

    pub async fn remove_prototype(&self, index: usize) -> Result<PrototypeRecord, LifecycleError> {
        let guard = self.store.lock().await;
        let record = self
            .prototypes
            .get(index)
            .ok_or(LifecycleError::IndexOutOfRange {
                index,
                len: self.prototypes.len(),
            })?;

        if record.is_subscribed {
            if let Err(e) = self.unsubscribe(&record.id).await {
                log::warn!("Failed to stop {}: {}", record.id, e);
            }
        }

        let path = self.config.prototypes_file();
        let result = remove_prototype_entry(&guard, &path, index, &record.id);
        self.prototypes.remove_index(index);

        match result {
            Ok(()) => {
                log::info!("Removed prototype {} ({})", record.name, record.id);
                Ok(record)
            }
            Err(source) => Err(LifecycleError::PartialRemoval {
                id: record.id,
                source,
            }),
        }
    }

    // Installed apps

    pub fn installed_apps(&self) -> Vec<AppRecord> {
        let apps = self.installed.read().unwrap_or_else(|p| p.into_inner());
        apps.iter()
            .cloned()
            .map(|mut app| {
                app.is_subscribed = self.prototypes.is_subscribed(&app.id);
                app
            })
            .collect()
    }

    pub async fn reload_installed(&self) -> usize {
        let guard = self.store.lock().await;
        self.reload_installed_locked(&guard)
    }

    /// CSV apps in file order, then installed services
    fn reload_installed_locked(&self, guard: &CatalogGuard<'_>) -> usize {
        let apps_dir = self.config.installed_apps_dir();
        let mut records: Vec<AppRecord> = guard
            .load_csv(&self.config.installed_apps_csv())
            .into_iter()
            .map(|row| app_record(&apps_dir, row))
            .collect();

        let services: Vec<crate::catalog::CatalogEntry> =
            guard.load(&self.config.installed_services_json());
        records.extend(services.into_iter().map(|entry| AppRecord {
            id: entry.id,
            display_name: entry.name,
            executable: String::new(),
            icon_path: entry.thumbnail,
            category: AppCategory::Service,
            is_subscribed: false,
        }));

        let count = records.len();
        *self.installed.write().unwrap_or_else(|p| p.into_inner()) = records;
        count
    }

    /// Start `<installed apps>/<folder>/<executable>` unless a process by
    /// that name already shows up in `ps -A`
    pub async fn launch_installed(&self, index: usize) -> Result<LaunchOutcome, LifecycleError> {
        let record = {
            let apps = self.installed.read().unwrap_or_else(|p| p.into_inner());
            apps.get(index)
                .cloned()
                .ok_or(LifecycleError::IndexOutOfRange {
                    index,
                    len: apps.len(),
                })?
        };
        if record.category != AppCategory::App || record.executable.is_empty() {
            return Err(LifecycleError::NotLaunchable(record.id));
        }
        validate_id(&record.id)?;
        validate_id(&record.executable)?;

        match self
            .runner
            .run("ps", &argv(["-A"]), self.config.inspect_timeout())
            .await
        {
            Ok(output) if output.success() => {
                if parse::process_present(&output.stdout, &record.executable) {
                    log::info!("{} is already open", record.executable);
                    return Ok(LaunchOutcome::AlreadyRunning);
                }
            }
            Ok(output) => log::warn!("ps failed: {}", output.stderr.trim()),
            Err(e) => log::warn!("{}", e),
        }

        let program = self
            .config
            .installed_apps_dir()
            .join(&record.id)
            .join(&record.executable);
        log::info!("Launching {} ({})", record.display_name, program.display());
        self.runner
            .spawn_detached(&program.to_string_lossy(), &[])
            .await?;
        Ok(LaunchOutcome::Launched(program))
    }

    pub async fn install_app(
        &self,
        descriptor: &PackageDescriptor,
    ) -> Result<InstallOutcome, LifecycleError> {
        validate_id(&descriptor.id)?;
        let category = if descriptor.is_service() {
            AppCategory::Service
        } else {
            AppCategory::App
        };
        log::info!(
            "Installing {} {} ({})",
            category.as_str(),
            descriptor.name,
            descriptor.id
        );

        let guard = self.store.lock().await;

        let install_cfg = self.config.install_config(&descriptor.id);
        if guard.write_if_missing(&install_cfg, descriptor)? {
            log::debug!("Wrote {}", install_cfg.display());
        }

        self.discard_container(&self.config.install_service_name).await;
        self.docker(installer_run_args(&self.config, &install_cfg))
            .await?
            .checked(&self.config.docker)?;

        let entry = descriptor.to_catalog_entry();
        let added = match category {
            AppCategory::Service => {
                guard.append_entry_if_absent(&self.config.installed_services_json(), entry)?
            }
            AppCategory::App => {
                let in_csv = guard
                    .append_csv_if_absent(&self.config.installed_apps_csv(), &descriptor.to_csv_row())?;
                let in_json =
                    guard.append_entry_if_absent(&self.config.installed_apps_json(), entry)?;
                in_csv || in_json
            }
        };
        if !added {
            log::info!("{} was already in the catalog", descriptor.id);
        }

        self.reload_installed_locked(&guard);
        Ok(InstallOutcome { category, added })
    }

    /// Remove by position in [`installed_apps`](Self::installed_apps)
    pub async fn remove_app(&self, index: usize) -> Result<AppRecord, LifecycleError> {
        let guard = self.store.lock().await;
        self.remove_at_locked(&guard, index).await
    }

    /// Resolved against the installed list as it stands once the lock is held
    pub async fn remove_app_by_id(&self, id: &str) -> Result<AppRecord, LifecycleError> {
        let guard = self.store.lock().await;
        let index = self
            .installed
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| LifecycleError::NotInstalled(id.to_string()))?;
        self.remove_at_locked(&guard, index).await
    }

    async fn remove_at_locked(
        &self,
        guard: &CatalogGuard<'_>,
        index: usize,
    ) -> Result<AppRecord, LifecycleError> {
        let record = {
            let apps = self.installed.read().unwrap_or_else(|p| p.into_inner());
            apps.get(index)
                .cloned()
                .ok_or(LifecycleError::IndexOutOfRange {
                    index,
                    len: apps.len(),
                })?
        };

        if self.prototypes.is_subscribed(&record.id) {
            if let Err(e) = self.unsubscribe(&record.id).await {
                log::warn!("Failed to stop {}: {}", record.id, e);
            }
        }

        let result = match record.category {
            AppCategory::App => self.remove_app_files(guard, index, &record.id),
            AppCategory::Service => guard
                .remove_entry(&self.config.installed_services_json(), &record.id)
                .map(|_| ()),
        };

        match result {
            Ok(()) => {
                self.reload_installed_locked(guard);
                log::info!("Removed {} ({})", record.display_name, record.id);
                Ok(record)
            }
            Err(source) => {
                // Keep the in-memory list in step with what the caller asked for
                let mut apps = self.installed.write().unwrap_or_else(|p| p.into_inner());
                if apps.get(index).map(|a| a.id == record.id).unwrap_or(false) {
                    apps.remove(index);
                }
                log::error!("Removal of {} incomplete: {}", record.id, source);
                Err(LifecycleError::PartialRemoval {
                    id: record.id,
                    source,
                })
            }
        }
    }

    /// CSV row, apps JSON entry, then the app folder and archive; every step
    /// is attempted and the first failure is returned
    fn remove_app_files(
        &self,
        guard: &CatalogGuard<'_>,
        index: usize,
        id: &str,
    ) -> Result<(), CatalogError> {
        let csv = self.config.installed_apps_csv();
        let positional = guard
            .load_csv(&csv)
            .get(index)
            .map(|row| row.foldername == id)
            .unwrap_or(false);
        let csv_result = if positional {
            guard.remove_csv_at(&csv, index).map(|_| ())
        } else {
            log::warn!("{} moved in {}; removing by id", id, csv.display());
            guard.remove_csv_id(&csv, id).map(|_| ())
        };

        let json_result = guard
            .remove_entry(&self.config.installed_apps_json(), id)
            .map(|_| ());
        let files_result = guard.remove_app_files(&self.config.installed_apps_dir(), id);

        csv_result.and(json_result).and(files_result)
    }
}

fn app_record(apps_dir: &Path, row: CsvAppRow) -> AppRecord {
    let icon_path = apps_dir
        .join(&row.foldername)
        .join(&row.iconpath)
        .to_string_lossy()
        .into_owned();
    AppRecord {
        id: row.foldername,
        display_name: row.displayname,
        executable: row.executable,
        icon_path,
        category: AppCategory::App,
        is_subscribed: false,
    }
}

fn remove_prototype_entry(
    guard: &CatalogGuard<'_>,
    path: &Path,
    index: usize,
    id: &str,
) -> Result<(), CatalogError> {
    let entries: Vec<PrototypeEntry> = guard.load(path);
    let position = match entries.get(index) {
        Some(entry) if entry.id == id => index,
        _ => match entries.iter().position(|e| e.id == id) {
            Some(position) => position,
            None => return Ok(()),
        },
    };
    // Raw values so fields this crate does not model are kept
    guard
        .remove_at::<serde_json::Value>(path, position)
        .map(|_| ())
}

/// Reject identifiers that could escape the app folder or read as a docker flag
pub fn validate_id(id: &str) -> Result<(), LifecycleError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.starts_with('-')
        || id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if invalid {
        Err(LifecycleError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

/// `docker run` arguments for a deployed prototype
pub fn app_run_args(config: &Config, id: &str) -> Vec<String> {
    let vss = format!(
        "{}/:/home/vss/vehicle_gen:ro",
        config.vss_generation_dir().display()
    );
    let packages = format!(
        "{}:/home/python-packages:ro",
        config.python_packages_dir().display()
    );
    let exec = format!(
        "{}:/app/exec",
        config.prototypes_dir().join(id).display()
    );
    argv([
        "run",
        "-d",
        "-it",
        "--name",
        id,
        "--log-opt",
        "max-size=10m",
        "--log-opt",
        "max-file=3",
        "-v",
        &vss,
        "-v",
        &packages,
        "--network",
        &config.app_network,
        "-v",
        &exec,
        &config.app_base_image(),
    ])
}

/// `docker run` arguments for the install service
pub fn installer_run_args(config: &Config, install_cfg: &Path) -> Vec<String> {
    let root = format!("{}:/app/.dk", config.root.display());
    let cfg = format!("{}:/app/installCfg.json", install_cfg.display());
    argv([
        "run",
        "-d",
        "-it",
        "--name",
        &config.install_service_name,
        "-v",
        &root,
        "-v",
        "/var/run/docker.sock:/var/run/docker.sock",
        "--log-opt",
        "max-size=10m",
        "--log-opt",
        "max-file=3",
        "-v",
        &cfg,
        &config.install_service_image,
    ])
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Invalid app id: {0:?}")]
    InvalidId(String),

    #[error("Index {index} out of range ({len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Not installed: {0}")]
    NotInstalled(String),

    #[error("{0} has no executable to launch")]
    NotLaunchable(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Dropped from the in-memory list, but the files may still mention it
    #[error("{id} removed from the list, but the catalog could not be updated: {source}")]
    PartialRemoval {
        id: String,
        #[source]
        source: CatalogError,
    },
}
