use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "bsr-cache")]
#[command(about = "Inspect and repair the Bite-Size Reader cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./bsr.toml when present)
    #[arg(short, long, global = true, env = "BSR_CONFIG")]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the configured Redis answers
    Ping,
    /// Delete every key under the configured prefix
    Clear(ClearArgs),
    /// Show who holds a user's sync lock
    LockInfo(UserArgs),
    /// Remove a user's sync lock
    Unlock(UnlockArgs),
    /// Show the stored progress of a batch session
    Progress(SessionArgs),
    /// Stream live progress events of a batch session
    Watch(SessionArgs),
    /// Drop cached query results matching a pattern
    InvalidateQueries(PatternArgs),
}

#[derive(clap::Args)]
pub struct ClearArgs {
    /// Skip the confirmation guard
    #[arg(long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct UserArgs {
    /// User id owning the lock
    #[arg(short, long)]
    pub user: i64,
}

#[derive(clap::Args)]
pub struct UnlockArgs {
    /// User id owning the lock
    #[arg(short, long)]
    pub user: i64,
    /// Delete the lock even though another worker owns it
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct SessionArgs {
    /// Batch session id
    #[arg(short, long)]
    pub session: String,
}

#[derive(clap::Args)]
pub struct PatternArgs {
    /// Glob under the query namespace, e.g. "user_stats:*"
    #[arg(short, long)]
    pub pattern: String,
}
