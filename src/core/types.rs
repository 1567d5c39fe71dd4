use super::error::{Result, SyncError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

lazy_static! {
    static ref MONTH_KEY_PATTERN: Regex = Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$")
        .expect("month key pattern is a valid regex");
}

/// Spending category of an expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseCategory {
    Subscriptions,
    Ads,
    Salaries,
    Tools,
    Travel,
    Office,
    Other,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 7] = [
        Self::Subscriptions,
        Self::Ads,
        Self::Salaries,
        Self::Tools,
        Self::Travel,
        Self::Office,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscriptions => "SUBSCRIPTIONS",
            Self::Ads => "ADS",
            Self::Salaries => "SALARIES",
            Self::Tools => "TOOLS",
            Self::Travel => "TRAVEL",
            Self::Office => "OFFICE",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExpenseCategory {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::InvalidRecord(format!("unknown category '{}'", s)))
    }
}

/// Where an expense was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseSource {
    Manual,
    Email,
}

/// Mail provider a receipt was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptProvider {
    Gmail,
    Zoho,
}

/// Origin of an expense imported from a receipt email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub provider: ReceiptProvider,
    #[serde(default, rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
}

/// A single expense record.
///
/// `id` is stable for the whole lifetime of the record, tombstone included.
/// `created_at` never changes; `updated_at` advances on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub month_key: String,
    pub date: NaiveDate,
    pub vendor: String,
    pub amount: Decimal,
    pub currency: String,
    pub category: ExpenseCategory,
    pub source: ExpenseSource,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, rename = "receipt", skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    /// Checks structural well-formedness. Timestamp monotonicity across edits is the
    /// caller's concern.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::InvalidRecord("expense id is empty".to_string()));
        }
        validate_month_key(&self.month_key)?;
        if self.updated_at < self.created_at {
            return Err(SyncError::InvalidRecord(format!(
                "expense {} updated_at {} precedes created_at {}",
                self.id, self.updated_at, self.created_at
            )));
        }
        Ok(())
    }

    /// Returns a copy stamped as mutated at `now`.
    ///
    /// The new `updated_at` is strictly greater than the current one even if the
    /// wall clock went backwards.
    pub fn touched(&self, now: DateTime<Utc>) -> Expense {
        let mut next = self.clone();
        next.updated_at = next_updated_at(self.updated_at, now);
        next
    }

    /// Returns the tombstone of this expense, stamped at `now`.
    pub fn tombstone(&self, now: DateTime<Utc>) -> Expense {
        let mut next = self.touched(now);
        next.deleted = true;
        next
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Fields a user supplies when creating an expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpense {
    pub date: NaiveDate,
    pub vendor: String,
    pub amount: Decimal,
    pub currency: String,
    pub category: ExpenseCategory,
    pub source: ExpenseSource,
    pub notes: Option<String>,
    pub provenance: Option<Provenance>,
}

impl NewExpense {
    pub fn manual(
        date: NaiveDate,
        vendor: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        category: ExpenseCategory,
    ) -> Self {
        Self {
            date,
            vendor: vendor.into(),
            amount,
            currency: currency.into(),
            category,
            source: ExpenseSource::Manual,
            notes: None,
            provenance: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Materializes the record with a fresh id, created and updated at `now`.
    pub fn into_expense(self, now: DateTime<Utc>) -> Expense {
        Expense {
            id: new_record_id(),
            month_key: month_key_from_date(self.date),
            date: self.date,
            vendor: self.vendor,
            amount: self.amount,
            currency: self.currency,
            category: self.category,
            source: self.source,
            deleted: false,
            notes: self.notes,
            provenance: self.provenance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// All records of one month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthData {
    pub month_key: String,
    pub expenses: Vec<Expense>,
}

pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Formats the partition key ("YYYY-MM") a date belongs to.
pub fn month_key_from_date(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

pub fn validate_month_key(month_key: &str) -> Result<()> {
    if MONTH_KEY_PATTERN.is_match(month_key) {
        Ok(())
    } else {
        Err(SyncError::InvalidRecord(format!(
            "month key '{}' is not YYYY-MM",
            month_key
        )))
    }
}

fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}
