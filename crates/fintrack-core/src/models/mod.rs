//! Data models exchanged with the fintrack backend.
//!
//! - `User`, `TokenResponse`: registration and login payloads
//! - `Category`: expense and income categories
//! - `Transaction` (`Expense`, `Income`) and their creation payloads
//! - `MonthlySummary`, `CategoryTotal`: aggregate views for the dashboard

pub mod category;
pub mod summary;
pub mod transaction;
pub mod user;

pub use category::{Category, NewCategory};
pub use summary::{CategoryTotal, MonthlySummary};
pub use transaction::{
    Expense, Income, NewExpense, NewIncome, NewTransaction, Transaction, TransactionKind,
};
pub use user::{Credentials, TokenResponse, User};
