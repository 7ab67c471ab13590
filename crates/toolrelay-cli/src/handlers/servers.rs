//! Servers command handler.

use toolrelay_mcp::ServerValidation;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{print_separator, truncate_string};

/// List configured servers and their validation status.
///
/// Nothing is connected; this only inspects the configuration.
pub async fn execute(ctx: &CliContext) -> Result<Vec<ServerValidation>, CliError> {
    let servers = ctx.service.validate_servers().await?;

    if servers.is_empty() {
        println!("No servers configured.");
        return Ok(servers);
    }

    println!(
        "{:<4} {:<20} {:<8} {:<40} Status",
        "ID", "Name", "Enabled", "Command"
    );
    print_separator(90);

    for entry in &servers {
        let server = &entry.server;
        let command = std::iter::once(server.command.as_str())
            .chain(server.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let status = entry.error.as_deref().unwrap_or("ok");

        println!(
            "{:<4} {:<20} {:<8} {:<40} {}",
            server.id,
            truncate_string(&server.name, 19),
            if server.enabled { "yes" } else { "no" },
            truncate_string(&command, 39),
            status
        );
    }

    Ok(servers)
}
