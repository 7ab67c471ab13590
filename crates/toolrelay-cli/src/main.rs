//! CLI entry point - parses arguments, wires the stack and dispatches.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use toolrelay_cli::handlers::replay::ReplayArgs;
use toolrelay_cli::{Cli, CliContext, CliError, Commands, bootstrap, handlers};

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(ctx: &CliContext, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Servers => {
            handlers::servers::execute(ctx).await?;
        }
        Commands::Tools => {
            handlers::tools::execute(ctx).await?;
        }
        Commands::Call {
            server_id,
            tool,
            args,
        } => {
            handlers::call::execute(ctx, server_id, &tool, args.as_deref()).await?;
        }
        Commands::Replay {
            file,
            run_all,
            no_auto_complete,
        } => {
            let args = ReplayArgs {
                file,
                run_all,
                auto_complete: !no_auto_complete,
            };
            handlers::replay::execute(ctx, args).await?;
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let ctx = bootstrap(&cli.config).await?;
    let outcome = dispatch(&ctx, command).await;

    // Server processes must not outlive the command
    ctx.service.shutdown().await;
    Ok(outcome?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(e.downcast_ref::<CliError>().map_or(1, CliError::exit_code))
        }
    }
}
