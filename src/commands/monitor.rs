//! Long-running engine: poll, watch deployments, follow prototypes

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use dkorch::marketplace;
use dkorch::prototypes::watch_prototypes;
use dkorch::registry::RegistryEvent;
use dkorch::{ServiceRegistry, StatusPoller};

use super::Context;

pub async fn monitor(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();

    let registry = Arc::new(ServiceRegistry::new(&ctx.config.services));
    let poller = Arc::new(StatusPoller::new(
        Arc::clone(&ctx.config),
        Arc::clone(&ctx.runner),
        Arc::clone(&registry),
    ));
    let mut registry_events = poller.subscribe();
    let poller = Arc::clone(&poller).spawn(cancel.child_token());

    let watcher = ctx.watcher();
    let watch_task = Arc::clone(&watcher).spawn(cancel.child_token());
    let controller = ctx.controller(watcher, poller.refresh_trigger());
    let mut reports = controller.subscribe_reports();

    {
        let guard = ctx.store.lock().await;
        guard.ensure_csv(&ctx.config.installed_apps_csv())?;
        marketplace::ensure_marketplace_selection(&guard, &ctx.config.marketplace_selection())?;
    }
    let apps = controller.reload_installed().await;
    let prototypes = controller.reload_prototypes().await;
    log::info!("{} installed apps, {} prototypes", apps, prototypes);

    let (notify_tx, mut notify_rx) = mpsc::channel(8);
    let proto_task = match watch_prototypes(
        Arc::clone(&ctx.prototypes),
        Arc::clone(&ctx.store),
        ctx.config.prototypes_file(),
        notify_tx,
        cancel.child_token(),
    ) {
        Ok(task) => Some(task),
        Err(e) => {
            log::error!("{}; prototype list will not follow updates", e);
            None
        }
    };

    let mut running_check = interval(ctx.config.running_check());
    running_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
                log::info!("Shutting down");
                break;
            }
            event = registry_events.recv() => match event {
                Ok(RegistryEvent::HealthChanged(healthy)) => {
                    if healthy {
                        log::info!("System healthy");
                    } else {
                        log::warn!("System degraded");
                    }
                }
                Ok(RegistryEvent::ServicesChanged) => {
                    let snapshot = registry.snapshot();
                    let running = snapshot.services.iter().filter(|s| s.is_running()).count();
                    log::info!("{}/{} services running", running, snapshot.services.len());
                }
                Ok(RegistryEvent::StatsChanged) => {
                    let stats = registry.snapshot().stats.clone();
                    log::debug!(
                        "cpu {:.1}% mem {:.1}% disk {:.1}%",
                        stats.cpu_usage, stats.memory_usage, stats.disk_usage
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::debug!("Skipped {} registry events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            report = reports.recv() => {
                if let Ok(report) = report {
                    log::info!("{}", report.message);
                }
            }
            Some(count) = notify_rx.recv() => {
                log::info!("{} prototypes available", count);
            }
            _ = running_check.tick() => {
                match controller.check_running().await {
                    Ok(flipped) if !flipped.is_empty() => {
                        log::info!("Running state changed: {}", flipped.join(", "));
                    }
                    Ok(_) => {}
                    Err(e) => log::debug!("Running check skipped: {}", e),
                }
            }
        }
    }

    cancel.cancel();
    poller.shutdown().await;
    let _ = watch_task.await;
    if let Some(task) = proto_task {
        let _ = task.await;
    }

    Ok(())
}
