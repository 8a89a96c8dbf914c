//! Start or stop a platform service

use dkorch::lifecycle::ServiceAction;
use dkorch::poller::RefreshTrigger;

use super::Context;

pub async fn start(ctx: &Context, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    report(name, "start", controller.start_service(name).await?);
    Ok(())
}

pub async fn stop(ctx: &Context, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let controller = ctx.controller(ctx.watcher(), RefreshTrigger::disconnected());
    report(name, "stop", controller.stop_service(name).await?);
    Ok(())
}

fn report(name: &str, verb: &str, action: ServiceAction) {
    match action {
        ServiceAction::Triggered => println!("● {} - {} requested", name, verb),
        ServiceAction::NativeStub => {
            println!("○ {} - native service, {} is not supported yet", name, verb)
        }
    }
}
