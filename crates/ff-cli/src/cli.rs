//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// Flat-fee sponsorship settlement.
///
/// Sponsors pay a flat fee; every day their money is split over the
/// repositories they sponsor and the contributors of those repositories.
#[derive(Debug, Parser)]
#[command(name = "ffs", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage user accounts.
    #[command(subcommand)]
    Users(UsersAction),

    /// Manage repositories.
    #[command(subcommand)]
    Repos(ReposAction),

    /// Link git emails to accounts.
    #[command(subcommand)]
    GitEmail(GitEmailAction),

    /// Start sponsoring a repository.
    Sponsor(ActorRepoArgs),

    /// Stop sponsoring a repository.
    Unsponsor(ActorRepoArgs),

    /// Mark a repository as trusted for foundation matching.
    Trust(RepoArgs),

    /// Remove a repository's trusted mark.
    Untrust(RepoArgs),

    /// Choose repositories a foundation matches.
    #[command(subcommand)]
    MultiplierRepo(MultiplierRepoAction),

    /// Record payments.
    #[command(subcommand)]
    Payin(PayinAction),

    /// Record contribution-analysis results.
    #[command(subcommand)]
    Analysis(AnalysisAction),

    /// Settle one day.
    Settle {
        /// Calendar date to settle (defaults to the day that just ended).
        #[arg(long)]
        day: Option<NaiveDate>,
    },

    /// Show ledger status.
    Status,

    /// Show a user's earnings and spending.
    Balance {
        user: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Pay out a contributor's unclaimed earnings in one currency.
    Claim { user: String, currency: String },

    /// Run the hourly and daily jobs until interrupted.
    Serve {
        /// Seconds between scheduler polls.
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum UsersAction {
    /// Create an account.
    Add { id: String, email: String },

    /// Let another user pay for this user's sponsorships.
    Invite {
        user: String,

        /// The paying user; omit to remove the invitation.
        #[arg(long)]
        by: Option<String>,
    },

    /// Store or clear the payment method used for recurring charges.
    PaymentMethod {
        user: String,

        /// Omit to clear the stored method.
        method: Option<String>,
    },

    /// Turn a user into a foundation with a daily spending cap.
    Multiplier {
        user: String,

        /// Largest amount the foundation spends per day, per currency.
        #[arg(long, default_value = "0")]
        daily_limit: String,

        /// Turn the foundation flag off.
        #[arg(long)]
        disable: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ReposAction {
    /// Register a repository.
    Add {
        id: String,
        git_url: String,

        /// Display name (defaults to the id).
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum GitEmailAction {
    /// Link a git email to an account.
    Link {
        email: String,
        user: String,

        /// Store the link without confirming it.
        #[arg(long)]
        unconfirmed: bool,
    },

    /// Remove a git email link.
    Unlink { email: String, user: String },
}

#[derive(Debug, Subcommand)]
pub enum MultiplierRepoAction {
    /// Start matching a repository.
    Set(ActorRepoArgs),

    /// Stop matching a repository.
    Unset(ActorRepoArgs),
}

#[derive(Debug, Subcommand)]
pub enum PayinAction {
    /// Record a payment request.
    Request {
        user: String,
        amount: String,
        currency: String,

        #[arg(long, default_value_t = 1)]
        seats: i64,

        /// Days the payment covers.
        #[arg(long, default_value_t = 365)]
        freq: i64,

        /// Provider reference (generated when omitted).
        #[arg(long)]
        external_id: Option<String>,
    },

    /// Confirm a requested payment, recording the provider fee.
    Confirm {
        external_id: String,

        #[arg(long, default_value = "0")]
        fee: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum AnalysisAction {
    /// Record an analysis callback from a JSON file.
    Ingest { file: PathBuf },
}

/// A user acting on a repository.
#[derive(Debug, Args)]
pub struct ActorRepoArgs {
    pub user: String,
    pub repo: String,

    /// Event time, RFC 3339 (defaults to now).
    #[arg(long)]
    pub at: Option<String>,
}

/// A repository-level relationship.
#[derive(Debug, Args)]
pub struct RepoArgs {
    pub repo: String,

    /// Event time, RFC 3339 (defaults to now).
    #[arg(long)]
    pub at: Option<String>,
}
