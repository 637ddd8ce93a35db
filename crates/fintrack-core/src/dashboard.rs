//! Dashboard views over a rolling six-month window.
//!
//! Turns the backend's summary endpoints into chart-ready series: one point
//! per month for the income/expense chart, one share per category for the
//! spending breakdown, and a newest-first ledger of transactions.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Months, NaiveDate};
use futures::future::try_join;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::{Category, CategoryTotal, MonthlySummary, Transaction};
use crate::utils::month_label;

/// Months covered by the dashboard, including the current one.
pub const WINDOW_MONTHS: u32 = 6;

/// Slices smaller than this fraction of total spend are drawn without a label.
pub const LABEL_THRESHOLD: f64 = 0.05;

pub const NO_EXPENSES_LABEL: &str = "No expenses";

const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SummaryWindow {
    /// The window ending on `today` and starting five calendar months earlier.
    pub fn ending(today: NaiveDate) -> Self {
        let start = today
            .checked_sub_months(Months::new(WINDOW_MONTHS - 1))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// First day of every month the window touches, oldest first.
    pub fn months(&self) -> Vec<NaiveDate> {
        let mut months = Vec::with_capacity(WINDOW_MONTHS as usize);
        let mut month = first_of_month(self.start);
        let last = first_of_month(self.end);
        while month <= last {
            months.push(month);
            match month.checked_add_months(Months::new(1)) {
                Some(next) => month = next,
                None => break,
            }
        }
        months
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyPoint {
    pub month: NaiveDate,
    pub label: String,
    pub income: f64,
    pub expenses: f64,
}

impl MonthlyPoint {
    pub fn net(&self) -> f64 {
        self.income - self.expenses
    }
}

/// One point per month in `window`. Months the backend left out are zero.
pub fn monthly_series(window: &SummaryWindow, summaries: &[MonthlySummary]) -> Vec<MonthlyPoint> {
    let mut totals: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
    for summary in summaries {
        match summary.month() {
            Some(month) => {
                let entry = totals.entry(month).or_default();
                entry.0 += summary.total_income;
                entry.1 += summary.total_expenses;
            }
            None => warn!(bucket = %summary.date, "Ignoring unparseable summary bucket"),
        }
    }

    window
        .months()
        .into_iter()
        .map(|month| {
            let (income, expenses) = totals.get(&month).copied().unwrap_or_default();
            MonthlyPoint {
                month,
                label: month_label(month),
                income,
                expenses,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryShare {
    pub name: String,
    pub amount: f64,
    /// Share of total spend, 0.0 to 1.0
    pub fraction: f64,
    pub show_label: bool,
    /// True for the stand-in slice drawn when there is no spending
    pub placeholder: bool,
}

impl CategoryShare {
    pub fn percent(&self) -> f64 {
        self.fraction * 100.0
    }
}

pub fn category_breakdown(totals: &[CategoryTotal]) -> Vec<CategoryShare> {
    let total: f64 = totals.iter().map(|t| t.total_amount.max(0.0)).sum();
    if total <= 0.0 {
        return vec![CategoryShare {
            name: NO_EXPENSES_LABEL.to_string(),
            amount: 0.0,
            fraction: 1.0,
            show_label: true,
            placeholder: true,
        }];
    }

    totals
        .iter()
        .map(|t| {
            let fraction = t.total_amount.max(0.0) / total;
            CategoryShare {
                name: t.category_name.clone(),
                amount: t.total_amount,
                fraction,
                show_label: fraction >= LABEL_THRESHOLD,
                placeholder: false,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub category: String,
    pub amount: f64,
}

/// Join transactions to their category names, newest first.
pub fn ledger_rows(records: &[Transaction], categories: &[Category]) -> Vec<LedgerRow> {
    let names: HashMap<i64, &str> = categories.iter().map(|c| (c.id, c.name.as_str())).collect();

    let mut rows: Vec<LedgerRow> = records
        .iter()
        .map(|r| LedgerRow {
            id: r.id,
            date: r.date,
            description: r.description.clone(),
            category: names
                .get(&r.category_id)
                .copied()
                .unwrap_or(UNKNOWN_CATEGORY)
                .to_string(),
            amount: r.amount,
        })
        .collect();

    rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
    rows
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub window: SummaryWindow,
    pub monthly: Vec<MonthlyPoint>,
    pub categories: Vec<CategoryShare>,
}

impl Dashboard {
    /// Fetch both summaries for the window ending `today`.
    ///
    /// The two requests are independent and issued together.
    pub async fn load(api: &ApiClient, today: NaiveDate) -> Result<Self, ApiError> {
        let window = SummaryWindow::ending(today);
        debug!(start = %window.start, end = %window.end, "Loading dashboard");

        let (summaries, totals) = try_join(
            api.income_expense_summary(Some(window.start), Some(window.end)),
            api.expenses_by_category(Some(window.start), Some(window.end)),
        )
        .await?;

        Ok(Self::build(window, &summaries, &totals))
    }

    pub fn build(window: SummaryWindow, summaries: &[MonthlySummary], totals: &[CategoryTotal]) -> Self {
        Self {
            window,
            monthly: monthly_series(&window, summaries),
            categories: category_breakdown(totals),
        }
    }

    pub fn total_income(&self) -> f64 {
        self.monthly.iter().map(|p| p.income).sum()
    }

    pub fn total_expenses(&self) -> f64 {
        self.monthly.iter().map(|p| p.expenses).sum()
    }
}
