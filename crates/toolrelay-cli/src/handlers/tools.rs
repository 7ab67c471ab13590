//! Tools command handler.

use toolrelay_core::{RelayEvent, ToolCatalog};

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{describe_event, print_separator, truncate_string};

/// Connect every enabled server and print the merged catalog.
///
/// Servers that fail to connect are reported and left out.
pub async fn execute(ctx: &CliContext) -> Result<ToolCatalog, CliError> {
    let catalog = ctx.service.initialize().await?;

    for event in ctx.take_events() {
        if matches!(event, RelayEvent::ServerError { .. }) {
            eprintln!("! {}", describe_event(&event));
        }
    }

    if catalog.is_empty() {
        println!("No tools discovered.");
        return Ok(catalog);
    }

    println!("{:<20} {:<30} Description", "Server", "Tool");
    print_separator(100);
    for tool in catalog.tools() {
        println!(
            "{:<20} {:<30} {}",
            truncate_string(&tool.server_name, 19),
            truncate_string(&tool.name, 29),
            truncate_string(tool.description.as_deref().unwrap_or("--"), 48)
        );
    }
    println!("\n{} tool(s) from {} connection(s)", catalog.len(), ctx.service.pool().len());

    Ok(catalog)
}
