use crate::outbox::DrainReport;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one pull-and-merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    /// Rows returned by the remote.
    pub pulled: usize,
    /// Rows that won the merge and were written locally.
    pub applied: usize,
    /// Rows that lost to a newer-or-equal local copy.
    pub ignored: usize,
    /// Malformed rows skipped at the merge boundary.
    pub rejected: usize,
    /// Set when a local write failed and the rest of the page was left for the next pull.
    pub halted: bool,
    /// Cursor after the pass.
    pub cursor: Option<DateTime<Utc>>,
}

/// Aggregate outcome of a reconciliation tick, for the host's status line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    pub drain: Option<DrainReport>,
    pub pull: Option<PullReport>,
    pub errors: Vec<String>,
    /// Set when the remote rejected the credentials or throttled us; retrying
    /// alone will not help.
    pub remote_refused: bool,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self
                .drain
                .as_ref()
                .is_none_or(|drain| drain.failures.is_empty())
    }

    /// One-line summary, e.g. `flushed 2, remaining 0, pulled 5`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        match &self.drain {
            Some(drain) => parts.push(format!(
                "flushed {}, remaining {}",
                drain.flushed, drain.remaining
            )),
            None => parts.push("outbox not drained".to_string()),
        }
        match &self.pull {
            Some(pull) => parts.push(format!("pulled {}", pull.pulled)),
            None => parts.push("pull failed".to_string()),
        }
        if !self.errors.is_empty() {
            parts.push(format!("{} error(s)", self.errors.len()));
        }
        if self.remote_refused {
            parts.push("remote refused credentials or rate limited".to_string());
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was still running; this trigger was dropped.
    Skipped,
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}
