//! Revisable Item History
//!
//! Append-only version history per (case, category). Each submission is an
//! immutable `Entry`; the current entry is always the one with the highest
//! sequence. A reviewer verdict is the reviewer's stamp on the submitted
//! current entry (verdict fields only) — a fresh assessor edit is always a
//! new entry. History is retained for audit, never mutated or deleted.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ActionContext;
use crate::error::LifecycleError;

/// Assessor-side progress on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentProgress {
    NotStarted,
    InProgress,
    Complete,
}

impl AssessmentProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for AssessmentProgress {
    type Err = ProgressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            _ => Err(ProgressParseError::Unknown(s.to_string())),
        }
    }
}

impl std::fmt::Display for AssessmentProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reviewer-side progress on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewProgress {
    NotStarted,
    InProgress,
    Complete,
}

impl ReviewProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ReviewProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reviewer's judgement on a submitted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerVerdict {
    Accepted,
    Rejected,
}

impl ReviewerVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ReviewerVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressParseError {
    #[error("Unknown progress value: {0}")]
    Unknown(String),
}

/// Immutable submission in a revisable item's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Monotonic per-item ordinal, insertion order. Strictly increasing, so
    /// "most recent" is always decided by sequence, never wall-clock alone.
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub assessment: AssessmentProgress,
    pub review: ReviewProgress,
    /// Reviewer's stamp on this entry; absent until reviewed
    pub verdict: Option<ReviewerVerdict>,
    pub verdict_at: Option<DateTime<Utc>>,
    pub verdict_by: Option<String>,
}

/// One assessable piece of case content with independent version history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisableItem {
    pub case_id: Uuid,
    /// Item family, e.g. "assessment_narrative", "permitted_development_right"
    pub category: String,
    entries: Vec<Entry>,
}

impl RevisableItem {
    /// An item with no entries — legal, denotes "not started"
    pub fn new(case_id: Uuid, category: impl Into<String>) -> Self {
        Self {
            case_id,
            category: category.into(),
            entries: Vec::new(),
        }
    }

    /// Entries in sequence order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    /// The entry with the highest sequence, if any
    pub fn current(&self) -> Option<&Entry> {
        self.entries.last()
    }

    /// Append a new entry, assigning the next sequence number.
    ///
    /// Returns the appended entry. Prior entries are never touched.
    pub fn append(
        &mut self,
        ctx: &ActionContext,
        assessment: AssessmentProgress,
        review: ReviewProgress,
    ) -> Entry {
        let sequence = self.entries.last().map(|e| e.sequence + 1).unwrap_or(1);
        let entry = Entry {
            sequence,
            created_at: ctx.at,
            created_by: Some(ctx.actor.clone()),
            assessment,
            review,
            verdict: None,
            verdict_at: None,
            verdict_by: None,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Record the reviewer's verdict against the current entry.
    ///
    /// Only the verdict fields change; assessment content stays frozen.
    pub fn record_verdict(
        &mut self,
        ctx: &ActionContext,
        verdict: ReviewerVerdict,
    ) -> Result<(), LifecycleError> {
        let Some(current) = self.entries.last_mut() else {
            return Err(LifecycleError::Validation(format!(
                "cannot record a verdict on {}: item has no entries",
                self.category
            )));
        };
        current.verdict = Some(verdict);
        current.verdict_at = Some(ctx.at);
        current.verdict_by = Some(ctx.actor.clone());
        current.review = ReviewProgress::Complete;
        Ok(())
    }
}
