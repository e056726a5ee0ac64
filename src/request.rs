//! Validation Request Lifecycle
//!
//! A time-boxed ask sent to an applicant, driven pending → open →
//! closed/cancelled. Closed and cancelled are terminal. `auto_close` is a
//! no-op off the open state so the scheduler stays idempotent; caller-facing
//! `respond`/`cancel` on a terminal request are conflicts instead.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::context::ActionContext;
use crate::error::LifecycleError;
use crate::policy::TimeoutDisposition;

/// The closed set of validation request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    DescriptionChange,
    RedLineBoundaryChange,
    AdditionalDocument,
    FeeChange,
    OwnershipCertificate,
    Other,
    PreCommencementCondition,
    HeadsOfTerms,
}

impl RequestKind {
    /// Every kind, for policy-table validation
    pub const ALL: [RequestKind; 8] = [
        Self::DescriptionChange,
        Self::RedLineBoundaryChange,
        Self::AdditionalDocument,
        Self::FeeChange,
        Self::OwnershipCertificate,
        Self::Other,
        Self::PreCommencementCondition,
        Self::HeadsOfTerms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DescriptionChange => "description_change",
            Self::RedLineBoundaryChange => "red_line_boundary_change",
            Self::AdditionalDocument => "additional_document",
            Self::FeeChange => "fee_change",
            Self::OwnershipCertificate => "ownership_certificate",
            Self::Other => "other",
            Self::PreCommencementCondition => "pre_commencement_condition",
            Self::HeadsOfTerms => "heads_of_terms",
        }
    }
}

impl FromStr for RequestKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "description_change" => Ok(Self::DescriptionChange),
            "red_line_boundary_change" => Ok(Self::RedLineBoundaryChange),
            "additional_document" => Ok(Self::AdditionalDocument),
            "fee_change" => Ok(Self::FeeChange),
            "ownership_certificate" => Ok(Self::OwnershipCertificate),
            "other" => Ok(Self::Other),
            "pre_commencement_condition" => Ok(Self::PreCommencementCondition),
            "heads_of_terms" => Ok(Self::HeadsOfTerms),
            _ => Err(LifecycleError::Validation(format!("unknown request kind: {s}"))),
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a validation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Drafted but not yet sent to the applicant
    Pending,
    /// Sent; the response window is running
    Open,
    Closed,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of an `auto_close` attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCloseOutcome {
    /// The request transitioned; notify with this transition id
    Closed { transition_id: Uuid },
    /// Request was not open — nothing happened, by design not an error
    NotOpen,
}

/// A time-boxed ask sent to an applicant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub id: Uuid,
    pub case_id: Uuid,
    pub kind: RequestKind,
    pub state: RequestState,
    /// Per-case ordinal, assigned in creation order, never reused
    pub sequence: u32,
    pub close_window_business_days: u32,
    pub notified_at: Option<DateTime<Utc>>,
    /// Only set once closed; `None` on timeout closures that assert nothing
    pub approved: Option<bool>,
    /// Required when `approved == Some(false)`
    pub rejection_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub auto_closed: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Stamped on the terminal transition; idempotency-keys its notification
    pub transition_id: Option<Uuid>,
}

impl ValidationRequest {
    /// Draft a request that has not yet been sent
    pub fn draft(
        ctx: &ActionContext,
        case_id: Uuid,
        kind: RequestKind,
        close_window_business_days: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            kind,
            state: RequestState::Pending,
            sequence: 0,
            close_window_business_days,
            notified_at: None,
            approved: None,
            rejection_reason: None,
            cancel_reason: None,
            auto_closed: false,
            created_at: ctx.at,
            created_by: Some(ctx.actor.clone()),
            closed_at: None,
            transition_id: None,
        }
    }

    /// Create a request directly in the open state (already notified)
    pub fn opened(
        ctx: &ActionContext,
        case_id: Uuid,
        kind: RequestKind,
        close_window_business_days: u32,
    ) -> Self {
        let mut request = Self::draft(ctx, case_id, kind, close_window_business_days);
        request.state = RequestState::Open;
        request.notified_at = Some(ctx.at);
        request
    }

    fn conflict(&self, expected: RequestState) -> LifecycleError {
        LifecycleError::RequestConflict {
            request_id: self.id,
            expected,
            actual: self.state,
        }
    }

    /// pending → open; starts the response window
    pub fn notify(&mut self, ctx: &ActionContext) -> Result<(), LifecycleError> {
        if self.state != RequestState::Pending {
            return Err(self.conflict(RequestState::Pending));
        }
        self.state = RequestState::Open;
        self.notified_at = Some(ctx.at);
        Ok(())
    }

    /// open → closed via applicant response.
    ///
    /// Returns the transition id for the closure. Rejecting without a reason
    /// is a validation error and mutates nothing.
    pub fn respond(
        &mut self,
        ctx: &ActionContext,
        approved: bool,
        rejection_reason: Option<&str>,
    ) -> Result<Uuid, LifecycleError> {
        if self.state != RequestState::Open {
            return Err(self.conflict(RequestState::Open));
        }
        let reason = rejection_reason.map(str::trim).filter(|r| !r.is_empty());
        if !approved && reason.is_none() {
            return Err(LifecycleError::Validation(
                "a rejection reason is required when a request is not approved".to_string(),
            ));
        }

        let transition_id = Uuid::new_v4();
        self.state = RequestState::Closed;
        self.approved = Some(approved);
        self.rejection_reason = if approved { None } else { reason.map(String::from) };
        self.auto_closed = false;
        self.closed_at = Some(ctx.at);
        self.transition_id = Some(transition_id);
        Ok(transition_id)
    }

    /// pending|open → cancelled (officer action, terminal, no approval semantics)
    pub fn cancel(&mut self, ctx: &ActionContext, reason: &str) -> Result<Uuid, LifecycleError> {
        if self.state.is_terminal() {
            return Err(self.conflict(RequestState::Open));
        }
        let transition_id = Uuid::new_v4();
        self.state = RequestState::Cancelled;
        self.cancel_reason = Some(reason.to_string());
        self.closed_at = Some(ctx.at);
        self.transition_id = Some(transition_id);
        Ok(transition_id)
    }

    /// open → closed on timeout, with the per-kind disposition deciding what
    /// `approved` records. Off the open state this is a no-op, never an
    /// error, so scheduler retries and races resolve quietly.
    pub fn auto_close(&mut self, ctx: &ActionContext, disposition: TimeoutDisposition) -> AutoCloseOutcome {
        if self.state != RequestState::Open {
            return AutoCloseOutcome::NotOpen;
        }
        let transition_id = Uuid::new_v4();
        self.state = RequestState::Closed;
        self.approved = disposition.approved_value();
        self.auto_closed = true;
        self.closed_at = Some(ctx.at);
        self.transition_id = Some(transition_id);
        AutoCloseOutcome::Closed { transition_id }
    }

    /// Whether the response window has elapsed as of `now`
    pub fn is_overdue(&self, calendar: &BusinessCalendar, now: DateTime<Utc>) -> bool {
        match self.notified_at {
            Some(notified_at) => {
                calendar.is_overdue(notified_at, self.close_window_business_days, now)
            }
            None => false,
        }
    }

    /// Dedupe key for the notification of the terminal transition
    pub fn idempotency_key(&self) -> Option<String> {
        self.transition_id.map(|t| format!("{}:{}", self.id, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ActionContext {
        ActionContext::new("officer", Utc::now())
    }

    fn open_request() -> ValidationRequest {
        ValidationRequest::opened(&ctx(), Uuid::new_v4(), RequestKind::DescriptionChange, 5)
    }

    #[test]
    fn test_notify_moves_pending_to_open() {
        let mut request =
            ValidationRequest::draft(&ctx(), Uuid::new_v4(), RequestKind::FeeChange, 5);
        assert_eq!(request.state, RequestState::Pending);
        assert!(request.notified_at.is_none());

        request.notify(&ctx()).unwrap();
        assert_eq!(request.state, RequestState::Open);
        assert!(request.notified_at.is_some());

        // Double-notify conflicts
        assert!(matches!(
            request.notify(&ctx()),
            Err(LifecycleError::RequestConflict { .. })
        ));
    }

    #[test]
    fn test_respond_approved() {
        let mut request = open_request();
        let transition_id = request.respond(&ctx(), true, None).unwrap();

        assert_eq!(request.state, RequestState::Closed);
        assert_eq!(request.approved, Some(true));
        assert!(!request.auto_closed);
        assert!(request.closed_at.is_some());
        assert_eq!(request.transition_id, Some(transition_id));
    }

    #[test]
    fn test_respond_rejection_requires_reason() {
        let mut request = open_request();

        assert!(matches!(
            request.respond(&ctx(), false, None),
            Err(LifecycleError::Validation(_))
        ));
        assert!(matches!(
            request.respond(&ctx(), false, Some("   ")),
            Err(LifecycleError::Validation(_))
        ));
        // Nothing mutated by the failed attempts
        assert_eq!(request.state, RequestState::Open);

        request.respond(&ctx(), false, Some("wrong boundary")).unwrap();
        assert_eq!(request.approved, Some(false));
        assert_eq!(request.rejection_reason.as_deref(), Some("wrong boundary"));
    }

    #[test]
    fn test_respond_on_terminal_request_is_conflict() {
        let mut request = open_request();
        request.respond(&ctx(), true, None).unwrap();

        let err = request.respond(&ctx(), true, None);
        assert!(matches!(
            err,
            Err(LifecycleError::RequestConflict {
                expected: RequestState::Open,
                actual: RequestState::Closed,
                ..
            })
        ));
    }

    #[test]
    fn test_cancel_from_pending_and_open() {
        let mut pending =
            ValidationRequest::draft(&ctx(), Uuid::new_v4(), RequestKind::Other, 5);
        pending.cancel(&ctx(), "raised in error").unwrap();
        assert_eq!(pending.state, RequestState::Cancelled);
        assert_eq!(pending.cancel_reason.as_deref(), Some("raised in error"));
        assert!(pending.approved.is_none());

        let mut open = open_request();
        open.cancel(&ctx(), "superseded").unwrap();
        assert_eq!(open.state, RequestState::Cancelled);

        // Cancelled is terminal
        assert!(matches!(
            open.cancel(&ctx(), "again"),
            Err(LifecycleError::RequestConflict { .. })
        ));
    }

    #[test]
    fn test_auto_close_records_disposition() {
        let mut request = open_request();
        let outcome = request.auto_close(&ctx(), TimeoutDisposition::Approve);
        assert!(matches!(outcome, AutoCloseOutcome::Closed { .. }));
        assert_eq!(request.approved, Some(true));
        assert!(request.auto_closed);

        let mut boundary =
            ValidationRequest::opened(&ctx(), Uuid::new_v4(), RequestKind::RedLineBoundaryChange, 5);
        boundary.auto_close(&ctx(), TimeoutDisposition::CloseOnly);
        assert_eq!(boundary.approved, None);
        assert!(boundary.auto_closed);
    }

    #[test]
    fn test_auto_close_off_open_state_is_noop() {
        let mut pending =
            ValidationRequest::draft(&ctx(), Uuid::new_v4(), RequestKind::Other, 5);
        assert_eq!(
            pending.auto_close(&ctx(), TimeoutDisposition::Approve),
            AutoCloseOutcome::NotOpen
        );
        assert_eq!(pending.state, RequestState::Pending);

        let mut closed = open_request();
        closed.respond(&ctx(), true, None).unwrap();
        let before = closed.transition_id;
        assert_eq!(
            closed.auto_close(&ctx(), TimeoutDisposition::Approve),
            AutoCloseOutcome::NotOpen
        );
        // The earlier transition is untouched
        assert_eq!(closed.transition_id, before);
    }

    #[test]
    fn test_idempotency_key_pairs_request_and_transition() {
        let mut request = open_request();
        assert!(request.idempotency_key().is_none());
        let transition_id = request.respond(&ctx(), true, None).unwrap();
        assert_eq!(
            request.idempotency_key(),
            Some(format!("{}:{}", request.id, transition_id))
        );
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in RequestKind::ALL {
            assert_eq!(kind.as_str().parse::<RequestKind>().ok(), Some(kind));
        }
    }
}
