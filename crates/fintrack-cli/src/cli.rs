//! Command line definitions.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fintrack")]
#[command(about = "Track expenses and income against a fintrack backend")]
#[command(version)]
pub struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, global = true, env = "FINTRACK_API_URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and remember the session
    Login {
        /// Username (prompted when omitted)
        username: Option<String>,
    },

    /// Create a new account
    Register {
        username: Option<String>,
    },

    /// End the current session
    Logout,

    /// Show who is logged in and when the session expires
    Status,

    /// Create the default expense categories if none exist yet
    Seed,

    /// Manage expense categories
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Manage income categories
    IncomeCategories {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Manage expenses
    Expenses {
        #[command(subcommand)]
        action: TransactionAction,
    },

    /// Manage income
    Income {
        #[command(subcommand)]
        action: TransactionAction,
    },

    /// Monthly income and expenses for the last six months
    Dashboard {
        /// Print the dashboard as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum CategoryAction {
    /// List categories
    List,

    /// Add a category
    Add {
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TransactionAction {
    /// List records, newest first
    List,

    /// Record a new entry
    Add(NewRecordArgs),

    /// Delete a record by id
    Delete {
        id: i64,
    },
}

#[derive(Args)]
pub struct NewRecordArgs {
    #[arg(short, long)]
    pub amount: f64,

    /// Category id (see `categories list`)
    #[arg(short, long)]
    pub category: i64,

    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Date as YYYY-MM-DD (default: today)
    #[arg(long)]
    pub date: Option<NaiveDate>,
}
