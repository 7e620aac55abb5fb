use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ff_core::{Clock, RelationshipKind, Transition};
use tracing_subscriber::EnvFilter;

use ff_cli::commands::{analysis, balance, claim, payin, relations, repos, settle, status, users};
use ff_cli::{
    AnalysisAction, Cli, Commands, Config, GitEmailAction, MultiplierRepoAction, PayinAction,
    ReposAction, Services, UsersAction,
};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(ff_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    let db = ff_cli::open_database(&config)?;
    Ok((db, config))
}

fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(future)
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // try_init so tests that already installed a subscriber keep working
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (db, config) = open_database(cli.config.as_deref())?;
    let clock = config.clock();
    let now = clock.now();
    let stdout = std::io::stdout();
    let out = &mut stdout.lock();

    match command {
        Commands::Users(action) => match action {
            UsersAction::Add { id, email } => users::add(out, &db, id, email, now)?,
            UsersAction::Invite { user, by } => users::invite(out, &db, user, by.as_deref())?,
            UsersAction::PaymentMethod { user, method } => {
                users::payment_method(out, &db, user, method.as_deref())?;
            }
            UsersAction::Multiplier {
                user,
                daily_limit,
                disable,
            } => users::multiplier(out, &db, user, daily_limit, *disable)?,
        },
        Commands::Repos(ReposAction::Add { id, git_url, name }) => {
            repos::add(out, &db, id, git_url, name.as_deref(), now)?;
        }
        Commands::GitEmail(action) => match action {
            GitEmailAction::Link {
                email,
                user,
                unconfirmed,
            } => repos::link_email(out, &db, email, user, !unconfirmed, now)?,
            GitEmailAction::Unlink { email, user } => repos::unlink_email(out, &db, email, user)?,
        },
        Commands::Sponsor(args) | Commands::Unsponsor(args) => {
            let transition = if matches!(command, Commands::Sponsor(_)) {
                Transition::Activate
            } else {
                Transition::Deactivate
            };
            relations::run(
                out,
                &db,
                RelationshipKind::Sponsor,
                transition,
                Some(args.user.as_str()),
                &args.repo,
                args.at.as_deref(),
                now,
            )?;
        }
        Commands::Trust(args) | Commands::Untrust(args) => {
            let transition = if matches!(command, Commands::Trust(_)) {
                Transition::Activate
            } else {
                Transition::Deactivate
            };
            relations::run(
                out,
                &db,
                RelationshipKind::Trust,
                transition,
                None,
                &args.repo,
                args.at.as_deref(),
                now,
            )?;
        }
        Commands::MultiplierRepo(action) => {
            let (transition, args) = match action {
                MultiplierRepoAction::Set(args) => (Transition::Activate, args),
                MultiplierRepoAction::Unset(args) => (Transition::Deactivate, args),
            };
            relations::run(
                out,
                &db,
                RelationshipKind::Multiplier,
                transition,
                Some(args.user.as_str()),
                &args.repo,
                args.at.as_deref(),
                now,
            )?;
        }
        Commands::Payin(action) => match action {
            PayinAction::Request {
                user,
                amount,
                currency,
                seats,
                freq,
                external_id,
            } => {
                payin::request(
                    out,
                    &db,
                    user,
                    amount,
                    currency,
                    *seats,
                    *freq,
                    external_id.as_deref(),
                    now,
                )?;
            }
            PayinAction::Confirm { external_id, fee } => {
                payin::confirm(out, &db, external_id, fee, now)?;
            }
        },
        Commands::Analysis(AnalysisAction::Ingest { file }) => {
            analysis::ingest(out, &db, file, now)?;
        }
        Commands::Settle { day } => {
            let services = Services::from_config(&config)?;
            block_on(settle::run(out, &db, &services, *day, now))?;
        }
        Commands::Status => status::run(out, &db, &config.database_path)?,
        Commands::Balance { user, json } => balance::run(out, &db, user, *json)?,
        Commands::Claim { user, currency } => {
            let services = Services::from_config(&config)?;
            block_on(claim::run(out, &db, &services, user, currency, now))?;
        }
        Commands::Serve { poll_secs } => {
            drop(db);
            let services = Services::from_config(&config)?;
            let poll = Duration::from_secs((*poll_secs).max(1));
            tracing::info!(?poll, "starting scheduler");
            block_on(ff_cli::scheduler::serve(
                &config,
                &services,
                &clock,
                poll,
                async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %err, "failed to listen for shutdown signal");
                        std::future::pending::<()>().await;
                    }
                },
            ))?;
        }
    }

    out.flush()?;
    Ok(())
}
