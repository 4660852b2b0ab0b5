use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quotamon_cli::cli::{Cli, Command};
use quotamon_cli::config::QuotamonConfig;
use quotamon_cli::notify::LogNotifier;
use quotamon_cli::run;
use quotamon_sink::HttpSink;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        QuotamonConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            cli.config.display()
        );
        QuotamonConfig::default()
    };
    if cli.access_token.is_some() {
        config.access_token = cli.access_token.clone();
    }

    match cli.command {
        Command::CheckQuota { storage } => {
            let sink = HttpSink::new(&config.sink_url, config.access_token.clone());
            let stats = run::run_check_quota(&config, &storage, &sink, cli.dry_run);
            tracing::info!("quota check completed: {}", stats.summary());
        }
        Command::InodeLog { location } => {
            let location = location.unwrap_or_else(|| config.snapshot_dir.clone());
            let notifier = LogNotifier {
                dry_run: cli.dry_run,
            };
            let stats = run::run_inode_log(&config, &location, &notifier);
            tracing::info!("inode log completed: {}", stats.summary());
        }
    }

    Ok(())
}
