//! Receipt candidates produced by the mail scrapers.
//!
//! Importing a candidate is an ordinary local create: the engine upserts it and
//! enqueues it like any manual expense.

use crate::core::{ExpenseCategory, ExpenseSource, NewExpense, Provenance, ReceiptProvider};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    New,
    Imported,
    Ignored,
}

/// An expense guessed from a receipt email, awaiting user confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptCandidate {
    pub id: String,
    pub month_key: String,
    pub provider: ReceiptProvider,
    pub message_id: String,
    pub vendor: String,
    pub amount: Decimal,
    pub currency: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReceiptCandidate {
    /// Builds the expense a user gets by importing this candidate.
    ///
    /// The subject doubles as the note and the receipt date as `receivedAt`.
    pub fn to_new_expense(&self, category: ExpenseCategory) -> NewExpense {
        NewExpense {
            date: self.date,
            vendor: self.vendor.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            category,
            source: ExpenseSource::Email,
            notes: self.subject.clone(),
            provenance: Some(Provenance {
                provider: self.provider,
                external_message_id: Some(self.message_id.clone()),
                subject: self.subject.clone(),
                from_address: self.from.clone(),
                received_at: Some(self.date.format("%Y-%m-%d").to_string()),
            }),
        }
    }

    pub fn is_importable(&self) -> bool {
        self.status == CandidateStatus::New
    }
}
