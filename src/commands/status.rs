//! Show service status

use std::sync::Arc;

use dkorch::registry::ServiceStatus;
use dkorch::{ServiceRegistry, StatusPoller};

use super::Context;

pub async fn status(ctx: &Context, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(ServiceRegistry::new(&ctx.config.services));
    let poller = StatusPoller::new(
        Arc::clone(&ctx.config),
        Arc::clone(&ctx.runner),
        Arc::clone(&registry),
    );

    poller.poll_services().await;
    poller.poll_system_stats().await;
    let snapshot = registry.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        return Ok(());
    }

    println!(
        "{:<22} {:<10} {:<9} {:<10} {:>7} {:>10}",
        "SERVICE", "KIND", "STATUS", "UPTIME", "CPU%", "MEM(MiB)"
    );
    for service in &snapshot.services {
        let symbol = match service.status {
            ServiceStatus::Running => "●",
            ServiceStatus::Stopped => "○",
            ServiceStatus::Unknown => "?",
        };
        println!(
            "{} {:<20} {:<10} {:<9} {:<10} {:>7.1} {:>10.1}",
            symbol,
            service.name,
            service.kind.as_str(),
            service.status.as_str(),
            if service.uptime.is_empty() { "-" } else { service.uptime.as_str() },
            service.cpu_percent,
            service.memory_usage_mib,
        );
    }

    let stats = &snapshot.stats;
    println!();
    println!("   CPU: {:.1}%", stats.cpu_usage);
    println!(
        "Memory: {:.1}% ({:.1} / {:.1} GB)",
        stats.memory_usage, stats.memory_used_gb, stats.memory_total_gb
    );
    println!(
        "  Disk: {:.1}% ({:.1} / {:.1} GB)",
        stats.disk_usage, stats.disk_used_gb, stats.disk_total_gb
    );
    println!(
        "Health: {}",
        if snapshot.health.healthy { "healthy" } else { "degraded" }
    );

    Ok(())
}
