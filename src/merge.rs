//! Last-writer-wins conflict policy.
//!
//! Every write that reaches the record store from outside the local user (pulled
//! remote rows, replays) goes through [`merge`]. Timestamps are writer-supplied wall
//! clock values, so a device with a fast clock can win against a genuinely newer
//! edit made elsewhere.

use crate::core::Expense;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Keep the local copy.
    Ignore,
    /// Upsert the incoming copy, tombstone included.
    Apply,
}

impl MergeDecision {
    pub fn is_apply(&self) -> bool {
        matches!(self, Self::Apply)
    }
}

/// Decides whether `incoming` replaces `local`.
///
/// Absent local copy: apply. Otherwise apply only when the incoming `updated_at` is
/// strictly newer; ties keep the local copy.
pub fn merge(local: Option<&Expense>, incoming: &Expense) -> MergeDecision {
    match local {
        None => MergeDecision::Apply,
        Some(local) if incoming.updated_at > local.updated_at => MergeDecision::Apply,
        Some(_) => MergeDecision::Ignore,
    }
}
