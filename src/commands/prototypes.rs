//! Deployable prototypes

use std::sync::Arc;

use dkorch::lifecycle::ExecuteOutcome;
use dkorch::poller::RefreshTrigger;
use tokio_util::sync::CancellationToken;

use super::Context;

pub async fn prototypes(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    controller.reload_prototypes().await;
    if let Err(e) = controller.check_running().await {
        log::warn!("Could not determine running prototypes: {}", e);
    }

    let list = ctx.prototypes.list();
    println!("{:<5} {:<28} {:<30} {:<15} {}", "#", "ID", "NAME", "LAST DEPLOY", "RUNNING");
    for (index, proto) in list.iter().enumerate() {
        println!(
            "{:<5} {:<28} {:<30} {:<15} {}",
            index,
            proto.id,
            proto.name.chars().take(30).collect::<String>(),
            proto.last_deploy,
            if proto.is_subscribed { "yes" } else { "-" }
        );
    }

    println!();
    println!("{} prototypes", list.len());
    Ok(())
}

pub async fn deploy(ctx: &Context, id: &str, name: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let watcher = ctx.watcher();
    let cancel = CancellationToken::new();
    let watch_task = Arc::clone(&watcher).spawn(cancel.clone());

    let controller = ctx.controller(watcher, RefreshTrigger::disconnected());
    controller.reload_prototypes().await;
    let name = match name {
        Some(name) => name.to_string(),
        None => ctx
            .prototypes
            .find(id)
            .map(|p| p.name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string()),
    };

    let result: Result<(), Box<dyn std::error::Error>> = match controller.execute_app(id, &name, true).await {
        Ok(ExecuteOutcome::AlreadyRunning) => {
            println!("● {} - already running", name);
            Ok(())
        }
        Ok(ExecuteOutcome::Launched(ticket)) => {
            println!("◐ {} - launched, waiting for container", name);
            match ticket.wait().await {
                Some(report) if report.started => {
                    println!("● {}", report.message);
                    Ok(())
                }
                Some(report) => Err(report.message.into()),
                None => Err("deployment superseded".into()),
            }
        }
        Ok(ExecuteOutcome::Stopped) => Ok(()),
        Err(e) => Err(e.into()),
    };

    cancel.cancel();
    let _ = watch_task.await;
    result
}

pub async fn kill(ctx: &Context, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    controller.reload_prototypes().await;
    controller.execute_app(id, id, false).await?;
    println!("○ {} - stop requested", id);
    Ok(())
}
