//! Wire shape of the remote `expenses` table.
//!
//! Rows are decoded leniently so one bad row cannot fail a whole page; validation
//! happens when a row is turned into an [`Expense`] at the merge boundary.

use crate::core::{Expense, ExpenseCategory, ExpenseSource, Provenance, Result, SyncError};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteExpenseRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub month_key: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub deleted: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub receipt: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RemoteExpenseRow {
    pub fn from_expense(expense: &Expense) -> Self {
        Self {
            id: Some(expense.id.clone()),
            month_key: Some(expense.month_key.clone()),
            date: Some(expense.date.format("%Y-%m-%d").to_string()),
            vendor: Some(expense.vendor.clone()),
            amount: Some(serde_json::Value::String(expense.amount.to_string())),
            currency: Some(expense.currency.clone()),
            category: Some(expense.category.as_str().to_string()),
            source: Some(source_name(expense.source).to_string()),
            deleted: Some(expense.deleted),
            notes: expense.notes.clone(),
            receipt: expense
                .provenance
                .as_ref()
                .and_then(|p| serde_json::to_value(p).ok()),
            created_at: Some(format_timestamp(expense.created_at)),
            updated_at: Some(format_timestamp(expense.updated_at)),
        }
    }

    /// The row's `updated_at`, when it parses.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_deref().and_then(|raw| parse_timestamp(raw).ok())
    }

    pub fn into_expense(self) -> Result<Expense> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| malformed("row without id"))?;
        let updated_raw = self
            .updated_at
            .ok_or_else(|| malformed(format!("row {} without updated_at", id)))?;
        let updated_at = parse_timestamp(&updated_raw)?;
        let created_at = match self.created_at.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => updated_at,
        };
        let date_raw = self
            .date
            .ok_or_else(|| malformed(format!("row {} without date", id)))?;
        let date = NaiveDate::parse_from_str(date_raw.get(..10).unwrap_or(&date_raw), "%Y-%m-%d")
            .map_err(|e| malformed(format!("row {} has bad date '{}': {}", id, date_raw, e)))?;
        let month_key = self
            .month_key
            .unwrap_or_else(|| crate::core::month_key_from_date(date));
        let amount = parse_amount(self.amount.as_ref())
            .ok_or_else(|| malformed(format!("row {} has no usable amount", id)))?;
        let category = match self.category.as_deref() {
            Some(raw) => ExpenseCategory::from_str(raw)?,
            None => ExpenseCategory::Other,
        };
        let source = match self.source.as_deref() {
            Some(raw) => parse_source(raw)?,
            None => ExpenseSource::Manual,
        };
        let provenance = match self.receipt {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value::<Provenance>(value).map_err(|e| {
                malformed(format!("row {} has bad receipt: {}", id, e))
            })?),
        };

        let expense = Expense {
            id,
            month_key,
            date,
            vendor: self.vendor.unwrap_or_default(),
            amount,
            currency: self
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            category,
            source,
            deleted: self.deleted.unwrap_or(false),
            notes: self.notes,
            provenance,
            created_at,
            updated_at,
        };
        expense.validate()?;
        Ok(expense)
    }
}

/// RFC 3339 with millisecond precision, the format the remote table stores.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| malformed(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_amount(value: Option<&serde_json::Value>) -> Option<Decimal> {
    match value? {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_source(raw: &str) -> Result<ExpenseSource> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "MANUAL" => Ok(ExpenseSource::Manual),
        "EMAIL" => Ok(ExpenseSource::Email),
        other => Err(malformed(format!("unknown source '{}'", other))),
    }
}

fn source_name(source: ExpenseSource) -> &'static str {
    match source {
        ExpenseSource::Manual => "MANUAL",
        ExpenseSource::Email => "EMAIL",
    }
}

fn malformed(message: impl Into<String>) -> SyncError {
    SyncError::InvalidRecord(message.into())
}
