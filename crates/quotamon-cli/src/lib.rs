//! Quotamon orchestration: config, CLI, per-storage processing loop,
//! critical-inode reporting.

pub mod cli;
pub mod config;
pub mod notify;
pub mod run;

pub use cli::{Cli, Command};
pub use config::{QuotamonConfig, StorageSystemConfig};
pub use notify::{format_critical_inodes, LogNotifier, Notifier};
pub use run::{process_storage, run_check_quota, run_inode_log, RunStats, StorageOutcome};
