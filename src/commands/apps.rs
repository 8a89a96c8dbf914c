//! Installed apps and marketplace packages

use std::path::Path;

use dkorch::catalog::PackageDescriptor;
use dkorch::lifecycle::LaunchOutcome;
use dkorch::marketplace::{self, CachedMarketplace, MarketplaceEndpoint, MarketplaceSource};
use dkorch::poller::RefreshTrigger;

use super::Context;

pub async fn apps(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    controller.reload_prototypes().await;
    controller.reload_installed().await;

    let apps = controller.installed_apps();
    println!("{:<5} {:<28} {:<8} {:<30} {}", "#", "ID", "KIND", "NAME", "RUNNING");
    for (index, app) in apps.iter().enumerate() {
        println!(
            "{:<5} {:<28} {:<8} {:<30} {}",
            index,
            app.id,
            app.category.as_str(),
            app.display_name.chars().take(30).collect::<String>(),
            if app.is_subscribed { "yes" } else { "-" }
        );
    }

    println!();
    println!("{} installed", apps.len());
    Ok(())
}

async fn search_results(
    ctx: &Context,
    term: &str,
) -> Result<(MarketplaceEndpoint, Vec<PackageDescriptor>), Box<dyn std::error::Error>> {
    let selection = ctx.config.marketplace_selection();
    {
        let guard = ctx.store.lock().await;
        if marketplace::ensure_marketplace_selection(&guard, &selection)? {
            log::info!("Created {}", selection.display());
        }
    }

    let endpoint = marketplace::load_marketplaces(&selection)
        .into_iter()
        .next()
        .unwrap_or_default();
    let source = CachedMarketplace::new(ctx.config.marketplace_cache());
    let results = source.search(&endpoint, term).await?;
    Ok((endpoint, results))
}

pub async fn search(ctx: &Context, term: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (endpoint, results) = search_results(ctx, term).await?;

    println!(
        "{} results for \"{}\" from {}:",
        results.len(),
        marketplace::normalize_term(term),
        if endpoint.name.is_empty() { "-" } else { endpoint.name.as_str() }
    );
    for (index, item) in results.iter().enumerate() {
        println!(
            "{:<4} {:<28} {:<30} {:<16} {} ({} downloads)",
            index,
            item.id,
            item.name.chars().take(30).collect::<String>(),
            item.category,
            item.author(),
            item.downloads
        );
    }

    Ok(())
}

pub async fn install(
    ctx: &Context,
    file: Option<&Path>,
    pick: Option<usize>,
    term: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor: PackageDescriptor = match (file, pick) {
        (Some(file), _) => serde_json::from_str(&std::fs::read_to_string(file)?)?,
        (None, Some(pick)) => {
            let (_, results) = search_results(ctx, term).await?;
            let count = results.len();
            results
                .into_iter()
                .nth(pick)
                .ok_or_else(|| format!("No result {} ({} results)", pick, count))?
        }
        (None, None) => return Err("Give a descriptor file or --pick".into()),
    };

    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    let outcome = controller.install_app(&descriptor).await?;

    if outcome.added {
        println!("● {} - installed as {}", descriptor.name, outcome.category.as_str());
    } else {
        println!("● {} - already installed, installer re-run", descriptor.name);
    }
    Ok(())
}

pub async fn launch(ctx: &Context, index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    controller.reload_installed().await;

    let name = controller
        .installed_apps()
        .get(index)
        .map(|app| app.display_name.clone())
        .unwrap_or_default();
    match controller.launch_installed(index).await? {
        LaunchOutcome::AlreadyRunning => println!("● {} - already open", name),
        LaunchOutcome::Launched(program) => println!("● {} - started {}", name, program.display()),
    }
    Ok(())
}

pub async fn remove(ctx: &Context, index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    controller.reload_prototypes().await;
    controller.reload_installed().await;

    let removed = controller.remove_app(index).await?;
    println!("○ {} ({}) - removed", removed.display_name, removed.id);
    Ok(())
}
