//! Recommendation Cycle
//!
//! Submit → review → accept/challenge loop for a case's recommendation.
//! At most one cycle per case is ever non-terminal; terminated cycles are
//! immutable history. The gate many status resolvers query — "submitted and
//! unchallenged" — always references the most recently terminated cycle,
//! since an active cycle has not been judged yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ActionContext;
use crate::error::LifecycleError;

/// Where a single cycle sits in the submit/review loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    InProgress,
    SubmittedForReview,
    ReviewComplete,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::SubmittedForReview => "submitted_for_review",
            Self::ReviewComplete => "review_complete",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One pass through the submit/review loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationCycle {
    pub cycle_number: u32,
    pub status: CycleStatus,
    pub submitted: bool,
    /// Recorded against the cycle being closed by a challenge, never the new one
    pub challenged: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl RecommendationCycle {
    fn new(cycle_number: u32) -> Self {
        Self {
            cycle_number,
            status: CycleStatus::InProgress,
            submitted: false,
            challenged: false,
            submitted_at: None,
            reviewed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == CycleStatus::ReviewComplete
    }

    /// The single gate many resolvers query
    pub fn is_accepted_submission(&self) -> bool {
        self.submitted && !self.challenged && self.status == CycleStatus::ReviewComplete
    }
}

/// A case's recommendation: the active cycle plus terminated history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecommendation {
    pub case_id: Uuid,
    /// Cycles in creation order; at most the last is non-terminal
    cycles: Vec<RecommendationCycle>,
}

impl CaseRecommendation {
    pub fn new(case_id: Uuid) -> Self {
        Self {
            case_id,
            cycles: vec![RecommendationCycle::new(1)],
        }
    }

    pub fn cycles(&self) -> &[RecommendationCycle] {
        &self.cycles
    }

    /// The current non-terminal cycle, if one exists
    pub fn active(&self) -> Option<&RecommendationCycle> {
        self.cycles.last().filter(|c| !c.is_terminal())
    }

    /// The most recently terminated cycle, if any
    pub fn last_terminated(&self) -> Option<&RecommendationCycle> {
        self.cycles.iter().rev().find(|c| c.is_terminal())
    }

    /// `submitted_at` of the cycle that most recently reached "submitted and
    /// unchallenged". `None` when the latest terminated cycle was challenged
    /// or no cycle has terminated — earlier accepted cycles are superseded.
    pub fn accepted_submission_gate(&self) -> Option<DateTime<Utc>> {
        self.last_terminated()
            .filter(|c| c.is_accepted_submission())
            .and_then(|c| c.submitted_at)
    }

    fn active_mut(&mut self, case_id: Uuid, action: &str) -> Result<&mut RecommendationCycle, LifecycleError> {
        match self.cycles.last_mut() {
            Some(cycle) if !cycle.is_terminal() => Ok(cycle),
            _ => Err(LifecycleError::CycleConflict {
                case_id,
                reason: format!("cannot {action}: no active cycle"),
            }),
        }
    }

    /// Assessor submits the recommendation for review
    pub fn submit(&mut self, ctx: &ActionContext) -> Result<(), LifecycleError> {
        let case_id = self.case_id;
        let cycle = self.active_mut(case_id, "submit")?;
        if cycle.status != CycleStatus::InProgress {
            return Err(LifecycleError::CycleConflict {
                case_id,
                reason: format!("cannot submit from {}", cycle.status),
            });
        }
        cycle.status = CycleStatus::SubmittedForReview;
        cycle.submitted = true;
        cycle.submitted_at = Some(ctx.at);
        Ok(())
    }

    /// Reviewer accepts the submission; the cycle terminates unchallenged
    pub fn accept(&mut self, ctx: &ActionContext) -> Result<(), LifecycleError> {
        let case_id = self.case_id;
        let cycle = self.active_mut(case_id, "accept")?;
        if cycle.status != CycleStatus::SubmittedForReview {
            return Err(LifecycleError::CycleConflict {
                case_id,
                reason: format!("cannot accept from {}", cycle.status),
            });
        }
        cycle.status = CycleStatus::ReviewComplete;
        cycle.reviewed_at = Some(ctx.at);
        Ok(())
    }

    /// Reviewer challenges the submission: the current cycle terminates with
    /// `challenged` recorded against it, and a fresh cycle opens.
    pub fn challenge(&mut self, ctx: &ActionContext) -> Result<(), LifecycleError> {
        let case_id = self.case_id;
        let cycle = self.active_mut(case_id, "challenge")?;
        if cycle.status != CycleStatus::SubmittedForReview {
            return Err(LifecycleError::CycleConflict {
                case_id,
                reason: format!("cannot challenge from {}", cycle.status),
            });
        }
        cycle.status = CycleStatus::ReviewComplete;
        cycle.challenged = true;
        cycle.reviewed_at = Some(ctx.at);
        let next_number = cycle.cycle_number + 1;
        self.cycles.push(RecommendationCycle::new(next_number));
        Ok(())
    }

    /// Officer withdraws a pending submission before review. Returns the cycle
    /// to in-progress without a new cycle number or a challenge mark.
    pub fn withdraw(&mut self, _ctx: &ActionContext) -> Result<(), LifecycleError> {
        let case_id = self.case_id;
        let cycle = self.active_mut(case_id, "withdraw")?;
        if cycle.status != CycleStatus::SubmittedForReview {
            return Err(LifecycleError::CycleConflict {
                case_id,
                reason: format!("cannot withdraw from {}", cycle.status),
            });
        }
        cycle.status = CycleStatus::InProgress;
        cycle.submitted = false;
        cycle.submitted_at = None;
        Ok(())
    }
}
