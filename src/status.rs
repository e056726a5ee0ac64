//! Status Resolver
//!
//! One parametric `resolve` function shared by every revisable item family,
//! driven by a small `CategoryPolicy` instead of a hand-written status class
//! per entity. Pure and total: called on the read path (status tags, task
//! lists), never mutates anything.

use serde::{Deserialize, Serialize};

use crate::recommendation::CaseRecommendation;
use crate::revision::{AssessmentProgress, ReviewProgress, ReviewerVerdict, RevisableItem};

/// Canonical lifecycle status of a revisable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    NotStarted,
    InProgress,
    /// Latest entry was rejected and the assessor has not produced a new one
    ToBeReviewed,
    /// Assessor changed something after a final, accepted submission
    Updated,
    Complete,
    Checked,
    Optional,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::ToBeReviewed => "to_be_reviewed",
            Self::Updated => "updated",
            Self::Complete => "complete",
            Self::Checked => "checked",
            Self::Optional => "optional",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which label a fully-reviewed item carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionLabel {
    /// Assessor-facing families read "complete"
    #[default]
    Complete,
    /// Reviewer-facing families read "checked"
    Checked,
}

/// Per-family knobs on the shared resolution algorithm
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryPolicy {
    /// Empty history reads "optional" instead of "not_started"
    #[serde(default)]
    pub optional_when_empty: bool,
    #[serde(default)]
    pub completion_label: CompletionLabel,
}

impl CategoryPolicy {
    pub fn assessor() -> Self {
        Self {
            optional_when_empty: false,
            completion_label: CompletionLabel::Complete,
        }
    }

    pub fn reviewer() -> Self {
        Self {
            optional_when_empty: false,
            completion_label: CompletionLabel::Checked,
        }
    }

    pub fn optional_when_empty(mut self) -> Self {
        self.optional_when_empty = true;
        self
    }
}

/// Resolve the canonical status of a revisable item.
///
/// Decision order matters and only latest facts count: the current entry's
/// verdict, and the submit time of the most recently terminated accepted
/// cycle. Earlier rejection/resubmission rounds are history, not inputs —
/// "is updated" never accumulates across superseded cycles.
pub fn resolve(
    item: &RevisableItem,
    recommendation: &CaseRecommendation,
    policy: &CategoryPolicy,
) -> ItemStatus {
    let Some(current) = item.current() else {
        return if policy.optional_when_empty {
            ItemStatus::Optional
        } else {
            ItemStatus::NotStarted
        };
    };

    // A rejected current entry needs assessor action, regardless of how many
    // prior rounds occurred. Any later entry would itself be current, so
    // "no newer entry after the rejection" holds by construction.
    if current.verdict == Some(ReviewerVerdict::Rejected) {
        return ItemStatus::ToBeReviewed;
    }

    if let Some(submitted_at) = recommendation.accepted_submission_gate() {
        if current.created_at > submitted_at {
            return ItemStatus::Updated;
        }
    }

    if current.review == ReviewProgress::Complete {
        return match policy.completion_label {
            CompletionLabel::Checked => ItemStatus::Checked,
            CompletionLabel::Complete => ItemStatus::Complete,
        };
    }

    // Review has started somewhere in the history (e.g. a superseded entry
    // carries a verdict) but the current entry is not yet reviewed.
    if item.entries().iter().any(|e| e.verdict.is_some()) {
        return ItemStatus::InProgress;
    }

    if current.assessment == AssessmentProgress::Complete {
        return ItemStatus::Complete;
    }

    ItemStatus::InProgress
}
