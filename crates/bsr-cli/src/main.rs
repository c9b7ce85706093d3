mod cli;
mod commands;
mod output;

use anyhow::{Result, anyhow};
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        output::print_warning(&format!("failed to read .env file: {e}"));
    }

    let cli = Cli::parse();
    let config = bsr_cache::config::loader::load_config(cli.config.as_deref())
        .map_err(|e| anyhow!(e))?;
    bsr_cache::init_tracing(&config.logging);
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Ping => commands::cache::ping(&config).await?,
        Commands::Clear(args) => commands::cache::clear(&config, args.yes).await?,
        Commands::LockInfo(args) => commands::lock::info(&config, args.user, format).await?,
        Commands::Unlock(args) => commands::lock::unlock(&config, args.user, args.force).await?,
        Commands::Progress(args) => commands::progress::show(&config, &args.session, format).await?,
        Commands::Watch(args) => commands::progress::watch(&config, &args.session, format).await?,
        Commands::InvalidateQueries(args) => {
            commands::cache::invalidate_queries(&config, &args.pattern).await?
        }
    }

    Ok(())
}
