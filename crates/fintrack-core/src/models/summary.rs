use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Income and expense totals for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    /// Month bucket, `YYYY-MM`
    pub date: String,
    pub total_income: f64,
    pub total_expenses: f64,
}

impl MonthlySummary {
    /// First day of the bucket's month, if the bucket is well-formed.
    pub fn month(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&format!("{}-01", self.date.trim()), "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category_name: String,
    pub total_amount: f64,
}
