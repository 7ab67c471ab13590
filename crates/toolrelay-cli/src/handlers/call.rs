//! Call command handler.

use serde_json::{Value, json};
use toolrelay_mcp::protocol::content_text;

use crate::bootstrap::CliContext;
use crate::error::CliError;

/// Parse `--args`; absent means `{}`.
pub fn parse_arguments(args: Option<&str>) -> Result<Value, CliError> {
    match args {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| CliError::Arguments(format!("--args is not valid JSON: {e}"))),
        None => Ok(json!({})),
    }
}

/// Call one tool and print its text content, or the raw result.
pub async fn execute(
    ctx: &CliContext,
    server_id: i64,
    tool: &str,
    args: Option<&str>,
) -> Result<Value, CliError> {
    let arguments = parse_arguments(args)?;
    let result = ctx.service.call_tool(server_id, tool, arguments).await?;

    match content_text(&result) {
        Some(text) => println!("{text}"),
        None => println!(
            "{}",
            serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string())
        ),
    }
    Ok(result)
}
