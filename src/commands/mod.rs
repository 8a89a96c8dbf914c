mod apps;
mod console;
mod monitor;
mod prototypes;
mod service;
mod status;

pub use apps::{apps, install, launch, remove, search};
pub use console::console;
pub use monitor::monitor;
pub use prototypes::{deploy, kill, prototypes};
pub use service::{start, stop};
pub use status::status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dkorch::catalog::CatalogStore;
use dkorch::poller::RefreshTrigger;
use dkorch::prototypes::PrototypeBook;
use dkorch::watcher::DeploymentWatcher;
use dkorch::{CommandRunner, Config, LifecycleController, SystemRunner};

/// Shared wiring for every subcommand
pub struct Context {
    pub config: Arc<Config>,
    pub runner: Arc<dyn CommandRunner>,
    pub store: Arc<CatalogStore>,
    pub prototypes: Arc<PrototypeBook>,
}

impl Context {
    pub fn load(config: Option<&Path>, root: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut loaded = Config::load(config)?;
        if let Some(root) = root {
            loaded = loaded.with_root(root);
        }
        log::debug!("Using root {}", loaded.root.display());

        Ok(Self {
            config: Arc::new(loaded),
            runner: Arc::new(SystemRunner),
            store: Arc::new(CatalogStore::new()),
            prototypes: Arc::new(PrototypeBook::new()),
        })
    }

    pub fn watcher(&self) -> Arc<DeploymentWatcher> {
        Arc::new(DeploymentWatcher::new(
            Arc::clone(&self.config),
            Arc::clone(&self.runner),
        ))
    }

    pub fn controller(&self, watcher: Arc<DeploymentWatcher>, refresh: RefreshTrigger) -> LifecycleController {
        LifecycleController::new(
            Arc::clone(&self.config),
            Arc::clone(&self.runner),
            Arc::clone(&self.store),
            watcher,
            Arc::clone(&self.prototypes),
            refresh,
        )
    }
}
