//! Flat-fee settlement CLI library.
//!
//! This crate provides the `ffs` command-line interface and the scheduler
//! behind `ffs serve`.

mod cli;
pub mod commands;
mod config;
pub mod scheduler;
mod services;

use anyhow::{Context, Result};

pub use cli::{
    ActorRepoArgs, AnalysisAction, Cli, Commands, GitEmailAction, MultiplierRepoAction,
    PayinAction, RepoArgs, ReposAction, UsersAction,
};
pub use config::Config;
pub use services::Services;

/// Opens the configured database, creating its parent directory.
pub fn open_database(config: &Config) -> Result<ff_db::Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    ff_db::Database::open(&config.database_path).context("failed to open database")
}
