//! dkorch - dreamOS service orchestration and monitoring engine
//!
//! Tracks the platform's fixed set of services, samples host resources,
//! deploys prototypes into app containers and keeps the installed-app
//! catalog on disk in step with what the marketplace installer did.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                         dkorch                          │
//! ├──────────────┬──────────────┬──────────────┬────────────┤
//! │ StatusPoller │  Lifecycle   │  Deployment  │  Console   │
//! │              │  Controller  │   Watcher    │            │
//! ├──────────────┴──────┬───────┴──────────────┴────────────┤
//! │  ServiceRegistry    │  CatalogStore / PrototypeBook     │
//! ├─────────────────────┴───────────────────────────────────┤
//! │            CommandRunner (docker, ps, top, ...)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every external program is reached through [`runner::CommandRunner`],
//! which takes an argument vector and never a shell string.

pub mod catalog;
pub mod config;
pub mod console;
pub mod lifecycle;
pub mod marketplace;
pub mod parse;
pub mod poller;
pub mod prototypes;
pub mod registry;
pub mod runner;
pub mod watcher;

pub use config::{Config, KnownService};
pub use lifecycle::{AppRecord, LifecycleController, LifecycleError};
pub use poller::StatusPoller;
pub use registry::{RegistrySnapshot, ServiceKind, ServiceRecord, ServiceRegistry, ServiceStatus};
pub use runner::{CommandRunner, SystemRunner};
