//! Run an allowed diagnostic command

use std::sync::Arc;

use dkorch::console::Console;

use super::Context;

pub async fn console(ctx: &Context, command: &str) -> Result<(), Box<dyn std::error::Error>> {
    let console = Console::new(Arc::clone(&ctx.config), Arc::clone(&ctx.runner));
    let output = console.execute(command).await?;
    println!("{}", output.text());

    if output.exit_code != Some(0) {
        std::process::exit(output.exit_code.unwrap_or(1));
    }
    Ok(())
}
