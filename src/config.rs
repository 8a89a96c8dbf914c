//! Engine configuration
//!
//! Built once at startup from defaults, an optional JSON file and `DK_*`
//! environment variables, then shared read-only as `Arc<Config>`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::registry::ServiceKind;

/// A service the registry knows about from startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KnownService {
    pub name: String,
    pub description: String,
    pub kind: ServiceKind,
}

impl KnownService {
    fn container(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: ServiceKind::Container,
        }
    }

    fn native(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: ServiceKind::Native,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the on-disk layout (`~/.dk/` by default)
    pub root: PathBuf,
    pub arch: String,
    pub docker_hub_namespace: String,
    /// Vehicle compute unit login; a default root becomes `/home/<user>/.dk`
    pub vcu_username: Option<String>,

    /// Static service catalog; nothing outside it is ever tracked
    pub services: Vec<KnownService>,
    /// Services that must be running for the system to count as healthy
    pub critical_services: Vec<String>,

    pub slow_poll_ms: u64,
    pub fast_poll_ms: u64,
    pub inspect_timeout_ms: u64,
    pub refresh_delay_ms: u64,

    pub deploy_grace_ms: u64,
    pub deploy_checks: u32,
    pub deploy_retry_ms: u64,
    pub watcher_wake_ms: u64,

    pub console_timeout_ms: u64,
    /// Timeout for mutating docker calls (kill/rm/run)
    pub mutate_timeout_ms: u64,
    /// How often deployed prototypes are matched against `docker ps`
    pub running_check_ms: u64,

    pub docker: String,
    pub app_network: String,
    pub install_service_name: String,
    pub install_service_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            arch: "amd64".to_string(),
            docker_hub_namespace: String::new(),
            vcu_username: None,
            services: vec![
                KnownService::container("sdv-runtime", "Eclipse KUKSA databroker (port 55555)"),
                KnownService::container("dk_manager", "DreamOS core manager with Docker access"),
                KnownService::container("dk_ivi", "In-Vehicle Infotainment interface"),
                KnownService::container("dk_appinstallservice", "Application lifecycle management"),
                KnownService::container("kuksa-client", "Vehicle signal specification client"),
                KnownService::container("dk_local_registry", "Local Docker registry"),
                KnownService::native("dk_can_provider", "CAN bus data provider"),
                KnownService::native("dk_service_manager", "Native service manager"),
                KnownService::native("system_monitor", "System resource monitor"),
            ],
            critical_services: vec!["sdv-runtime".to_string(), "dk_manager".to_string()],
            slow_poll_ms: 5000,
            fast_poll_ms: 2000,
            inspect_timeout_ms: 3000,
            refresh_delay_ms: 2000,
            deploy_grace_ms: 3000,
            deploy_checks: 3,
            deploy_retry_ms: 1000,
            watcher_wake_ms: 100,
            console_timeout_ms: 10_000,
            mutate_timeout_ms: 60_000,
            running_check_ms: 3000,
            docker: "docker".to_string(),
            app_network: "dk_network".to_string(),
            install_service_name: "dk_appinstallservice".to_string(),
            install_service_image: "autowrx/dk_appinstallservice:latest".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the optional JSON file, then `DK_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.root = expand_tilde(&config.root);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `DK_CONTAINER_ROOT` wins over a root derived from the VCU user
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(arch) = non_empty("DK_ARCH") {
            self.arch = arch;
        }
        if let Some(namespace) = non_empty("DK_DOCKER_HUB_NAMESPACE") {
            self.docker_hub_namespace = namespace;
        }
        if let Some(user) = non_empty("DK_VCU_USERNAME") {
            self.vcu_username = Some(user);
        }

        if let Some(root) = non_empty("DK_CONTAINER_ROOT") {
            self.root = PathBuf::from(root);
        } else if self.root == default_root() {
            if let Some(root) = self.vcu_username.as_deref().and_then(vcu_root) {
                self.root = root;
            }
        }
    }

    /// Same configuration rooted elsewhere (used by `--root` and tests)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = expand_tilde(&root.into());
        self
    }

    pub fn known(&self, name: &str) -> Option<&KnownService> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn slow_poll(&self) -> Duration {
        Duration::from_millis(self.slow_poll_ms)
    }

    pub fn fast_poll(&self) -> Duration {
        Duration::from_millis(self.fast_poll_ms)
    }

    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_millis(self.inspect_timeout_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn deploy_grace(&self) -> Duration {
        Duration::from_millis(self.deploy_grace_ms)
    }

    pub fn deploy_retry(&self) -> Duration {
        Duration::from_millis(self.deploy_retry_ms)
    }

    pub fn watcher_wake(&self) -> Duration {
        Duration::from_millis(self.watcher_wake_ms.max(1))
    }

    pub fn console_timeout(&self) -> Duration {
        Duration::from_millis(self.console_timeout_ms)
    }

    pub fn mutate_timeout(&self) -> Duration {
        Duration::from_millis(self.mutate_timeout_ms)
    }

    pub fn running_check(&self) -> Duration {
        Duration::from_millis(self.running_check_ms.max(1))
    }

    // On-disk layout

    pub fn installed_apps_json(&self) -> PathBuf {
        self.root.join("dk_installedapps/installedapps.json")
    }

    pub fn installed_services_json(&self) -> PathBuf {
        self.root.join("dk_installedservices/installedservices.json")
    }

    /// Folder holding the CSV table plus one folder (and archive) per app
    pub fn installed_apps_dir(&self) -> PathBuf {
        self.root.join("installedapps")
    }

    pub fn installed_apps_csv(&self) -> PathBuf {
        self.installed_apps_dir().join("installedapps.csv")
    }

    pub fn marketplace_dir(&self) -> PathBuf {
        self.root.join("dk_marketplace")
    }

    pub fn marketplace_selection(&self) -> PathBuf {
        self.marketplace_dir().join("marketplaceselection.json")
    }

    pub fn marketplace_cache(&self) -> PathBuf {
        self.marketplace_dir().join("marketplace_data_installcfg.json")
    }

    pub fn install_config(&self, app_id: &str) -> PathBuf {
        self.marketplace_dir().join(format!("{}_installcfg.json", app_id))
    }

    pub fn prototypes_dir(&self) -> PathBuf {
        self.root.join("dk_manager/prototypes")
    }

    pub fn prototypes_file(&self) -> PathBuf {
        self.prototypes_dir().join("prototypes.json")
    }

    pub fn vss_generation_dir(&self) -> PathBuf {
        self.root.join("dk_vssgeneration/vehicle_gen")
    }

    pub fn python_packages_dir(&self) -> PathBuf {
        self.root
            .join("dk_app_python_template/target")
            .join(&self.arch)
            .join("python-packages")
    }

    /// Image used to run deployed prototypes
    pub fn app_base_image(&self) -> String {
        if self.docker_hub_namespace.is_empty() {
            "dk_app_python_template:baseimage".to_string()
        } else {
            format!("{}/dk_app_python_template:baseimage", self.docker_hub_namespace)
        }
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".dk"))
        .unwrap_or_else(|| PathBuf::from(".dk"))
}

fn vcu_root(user: &str) -> Option<PathBuf> {
    let user = user.trim();
    if user.is_empty() || user == "." || user == ".." || user.contains('/') {
        log::warn!("Ignoring VCU username {:?}", user);
        return None;
    }
    Some(Path::new("/home").join(user).join(".dk"))
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
