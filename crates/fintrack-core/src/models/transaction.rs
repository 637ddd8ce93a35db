use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which ledger a transaction belongs to. Expenses and income share a shape
/// but live under separate endpoints and category lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Expense,
    Income,
}

impl TransactionKind {
    pub fn path(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "/expenses",
            TransactionKind::Income => "/income",
        }
    }

    pub fn categories_path(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "/categories",
            TransactionKind::Income => "/income-categories",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "Expense",
            TransactionKind::Income => "Income",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    #[serde(rename = "categoryId")]
    pub category_id: i64,
}

pub type Expense = Transaction;
pub type Income = Transaction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub amount: f64,
    pub description: String,
    #[serde(rename = "categoryId")]
    pub category_id: i64,
    pub date: NaiveDate,
}

pub type NewExpense = NewTransaction;
pub type NewIncome = NewTransaction;

impl NewTransaction {
    /// Check the fields a record needs before it is sent.
    pub fn validate(&self, today: NaiveDate) -> Result<(), &'static str> {
        if !self.amount.is_finite() || self.amount <= 0.0 || self.category_id <= 0 {
            return Err("Please fill in all required fields");
        }
        if self.date > today {
            return Err("Date cannot be in the future");
        }
        Ok(())
    }
}
