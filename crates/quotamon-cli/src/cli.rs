use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quotamon")]
#[command(about = "Filesystem quota monitoring and reconciliation", long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value = "/etc/quotamon/quotamon.toml")]
    pub config: PathBuf,

    #[arg(long, env = "QUOTAMON_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    CheckQuota {
        #[arg(short, long)]
        storage: Vec<String>,
    },
    InodeLog {
        #[arg(short, long)]
        location: Option<PathBuf>,
    },
}
