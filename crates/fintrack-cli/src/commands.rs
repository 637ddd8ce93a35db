//! Subcommand handlers.
//!
//! Backend failures have already been shown to the user by the notifier by
//! the time a handler sees them, so `main` only turns them into an exit code.

use anyhow::Context;
use chrono::Local;
use fintrack_core::dashboard::{ledger_rows, Dashboard};
use fintrack_core::models::{Category, NewTransaction, TransactionKind};
use fintrack_core::utils::{format_currency, format_date, truncate_string};
use fintrack_core::{ApiError, Config, Session, SessionManager};
use futures::future::try_join;
use tracing::warn;

use crate::cli::{CategoryAction, Commands, NewRecordArgs, TransactionAction};
use crate::console::{prompt_password, prompt_username};

const PASSWORD_MISMATCH: &str = "Passwords do not match";
const NOT_LOGGED_IN: &str = "Not logged in. Run `fintrack login` first.";

/// Width of the description column in transaction tables
const DESCRIPTION_WIDTH: usize = 32;
const CATEGORY_WIDTH: usize = 20;

pub enum CommandError {
    Api(ApiError),
    /// Already shown to the user
    Reported,
    Other(anyhow::Error),
}

impl From<ApiError> for CommandError {
    fn from(e: ApiError) -> Self {
        CommandError::Api(e)
    }
}

impl From<anyhow::Error> for CommandError {
    fn from(e: anyhow::Error) -> Self {
        CommandError::Other(e)
    }
}

pub async fn run(command: Commands, manager: &SessionManager, config: &mut Config) -> Result<(), CommandError> {
    let result = match command {
        Commands::Login { username } => login(manager, config, username).await,
        Commands::Register { username } => register(manager, config, username).await,
        Commands::Logout => {
            manager.logout();
            Ok(())
        }
        Commands::Status => {
            status(&manager.session());
            Ok(())
        }
        Commands::Seed => seed(manager).await,
        Commands::Categories { action } => categories(manager, TransactionKind::Expense, action).await,
        Commands::IncomeCategories { action } => categories(manager, TransactionKind::Income, action).await,
        Commands::Expenses { action } => transactions(manager, TransactionKind::Expense, action).await,
        Commands::Income { action } => transactions(manager, TransactionKind::Income, action).await,
        Commands::Dashboard { json } => dashboard(manager, json).await,
    };

    match result {
        Err(CommandError::Api(e)) => {
            if manager.handle_rejection(&e) {
                warn!(error = %e, "Stored session rejected by backend");
            }
            Err(CommandError::Reported)
        }
        other => other,
    }
}

fn require_login(manager: &SessionManager) -> Result<(), CommandError> {
    if manager.is_authenticated() {
        Ok(())
    } else {
        eprintln!("{}", NOT_LOGGED_IN);
        Err(CommandError::Reported)
    }
}

fn username_or_prompt(given: Option<String>, config: &Config) -> anyhow::Result<String> {
    match given {
        Some(name) => Ok(name),
        None => prompt_username(config.last_username.as_deref()),
    }
}

async fn login(manager: &SessionManager, config: &mut Config, username: Option<String>) -> Result<(), CommandError> {
    let username = username_or_prompt(username, config)?;
    let password = prompt_password("Password: ")?;

    manager.login(&username, &password).await?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

async fn register(manager: &SessionManager, config: &Config, username: Option<String>) -> Result<(), CommandError> {
    let username = username_or_prompt(username, config)?;
    let password = prompt_password("Password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        eprintln!("error: {}", PASSWORD_MISMATCH);
        return Err(CommandError::Reported);
    }

    match manager.register(&username, &password).await {
        Ok(user) => {
            println!("Created account {} ({})", user.username, user.id);
            Ok(())
        }
        Err(ApiError::UsernameTaken) => Err(CommandError::Reported),
        Err(e) => Err(e.into()),
    }
}

fn status(session: &Session) {
    match session.data() {
        Some(data) => {
            println!("Logged in as {}", data.subject());
            println!(
                "Session expires {} ({} minutes left)",
                data.expires_at().with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                data.minutes_until_expiry().max(0),
            );
        }
        None => println!("Not logged in"),
    }
}

async fn seed(manager: &SessionManager) -> Result<(), CommandError> {
    require_login(manager)?;
    let categories = manager.api().ensure_default_categories().await?;
    print_categories(TransactionKind::Expense, &categories);
    Ok(())
}

async fn categories(manager: &SessionManager, kind: TransactionKind, action: CategoryAction) -> Result<(), CommandError> {
    require_login(manager)?;
    let api = manager.api();

    match action {
        CategoryAction::List => {
            let categories = api.list_categories_for(kind).await?;
            print_categories(kind, &categories);
        }
        CategoryAction::Add { name } => {
            let category = api.create_category_for(kind, &name).await?;
            println!("Created category {} ({})", category.name, category.id);
        }
    }
    Ok(())
}

fn print_categories(kind: TransactionKind, categories: &[Category]) {
    if categories.is_empty() {
        println!("No {} categories", kind.display_name().to_lowercase());
    }
    for category in categories {
        println!("{:>5}  {}", category.id, category.name);
    }
}

async fn transactions(manager: &SessionManager, kind: TransactionKind, action: TransactionAction) -> Result<(), CommandError> {
    require_login(manager)?;
    let api = manager.api();

    match action {
        TransactionAction::List => {
            let (records, categories) =
                try_join(api.list_transactions(kind), api.list_categories_for(kind)).await?;
            let rows = ledger_rows(&records, &categories);
            if rows.is_empty() {
                println!("No {} recorded", kind.display_name().to_lowercase());
            }
            for row in rows {
                println!(
                    "{:>5}  {:<13} {:<cw$} {:<dw$} {:>12}",
                    row.id,
                    format_date(row.date),
                    truncate_string(&row.category, CATEGORY_WIDTH),
                    truncate_string(&row.description, DESCRIPTION_WIDTH),
                    format_currency(row.amount),
                    cw = CATEGORY_WIDTH,
                    dw = DESCRIPTION_WIDTH,
                );
            }
        }
        TransactionAction::Add(args) => {
            let record = api.create_transaction(kind, &new_record(args)).await?;
            println!(
                "Recorded {} of {} on {} ({})",
                kind.display_name().to_lowercase(),
                format_currency(record.amount),
                format_date(record.date),
                record.id
            );
        }
        TransactionAction::Delete { id } => {
            api.delete_transaction(kind, id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

fn new_record(args: NewRecordArgs) -> NewTransaction {
    NewTransaction {
        amount: args.amount,
        description: args.description,
        category_id: args.category,
        date: args.date.unwrap_or_else(|| Local::now().date_naive()),
    }
}

async fn dashboard(manager: &SessionManager, json: bool) -> Result<(), CommandError> {
    require_login(manager)?;
    let dashboard = Dashboard::load(manager.api(), Local::now().date_naive()).await?;

    if json {
        let value = serde_json::json!({
            "start": dashboard.window.start,
            "end": dashboard.window.end,
            "months": dashboard.monthly.iter().map(|p| serde_json::json!({
                "month": p.label,
                "income": p.income,
                "expenses": p.expenses,
            })).collect::<Vec<_>>(),
            "categories": dashboard.categories.iter().filter(|c| !c.placeholder).map(|c| serde_json::json!({
                "name": c.name,
                "amount": c.amount,
                "percent": c.percent(),
            })).collect::<Vec<_>>(),
        });
        let text = serde_json::to_string_pretty(&value).context("Failed to encode dashboard")?;
        println!("{}", text);
        return Ok(());
    }

    println!("{:<10} {:>14} {:>14} {:>14}", "Month", "Income", "Expenses", "Net");
    for point in &dashboard.monthly {
        println!(
            "{:<10} {:>14} {:>14} {:>14}",
            point.label,
            format_currency(point.income),
            format_currency(point.expenses),
            format_currency(point.net()),
        );
    }
    println!(
        "{:<10} {:>14} {:>14} {:>14}",
        "Total",
        format_currency(dashboard.total_income()),
        format_currency(dashboard.total_expenses()),
        format_currency(dashboard.total_income() - dashboard.total_expenses()),
    );

    println!();
    println!("Spending by category");
    for share in &dashboard.categories {
        if share.placeholder {
            println!("  {}", share.name);
        } else if share.show_label {
            println!("  {:<24} {:>12} {:>5.1}%", share.name, format_currency(share.amount), share.percent());
        } else {
            println!("  {:<24} {:>12}", share.name, format_currency(share.amount));
        }
    }
    Ok(())
}
